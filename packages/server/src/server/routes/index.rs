use axum::response::Html;

const INDEX_PAGE: &str = include_str!("../../../static/index.html");

/// Submit form that streams the job's progress and shows the finished letter.
pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_PAGE)
}
