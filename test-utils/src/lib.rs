//! `test-utils` is used for testing in both `polite-lib` and `polite-bin`.
//! This crate does not depend on `polite-lib` or `polite-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server serving a fixed body on each of the given paths.
/// Every path is expected to be requested exactly `$times` times.
///
/// ```ignore
/// let server = pages_mock_server!(1, ("/a", "first"), ("/b", "second"));
/// ```
#[macro_export]
macro_rules! pages_mock_server {
    ($times:expr $(, ($path:expr, $body:expr))+ $(,)?) => {{
        let mock_server = wiremock::MockServer::start().await;
        $(
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .and(wiremock::matchers::path($path))
                .respond_with(wiremock::ResponseTemplate::new(200).set_body_string($body))
                .expect($times)
                .mount(&mock_server)
                .await;
        )+
        mock_server
    }};
}
