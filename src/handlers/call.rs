use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use tracing::info;
use url::Url;

/// Answer an incoming call by telling the carrier to open a media stream
/// back to this server.
pub async fn incoming_call(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let stream_url = media_stream_url(&config.server.public_url)?;

    info!("Answering incoming call, media stream at {}", stream_url);

    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(connect_response(&stream_url)))
}

/// `http(s)://host[/prefix][?query]` -> `ws(s)://host[/prefix]/media-stream[?query]`
pub fn media_stream_url(public_url: &str) -> Result<String, AppError> {
    let invalid = || {
        AppError::ConfigError(format!(
            "server.public_url must be an http(s) or ws(s) URL, got '{}'",
            public_url
        ))
    };

    let mut url = Url::parse(public_url).map_err(|_| invalid())?;
    let ws_scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(invalid()),
    };
    url.set_scheme(ws_scheme).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .push("media-stream");

    Ok(url.into())
}

fn connect_response(stream_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n  <Connect>\n    <Stream url=\"{}\" />\n  </Connect>\n</Response>\n",
        escape_attr(stream_url)
    )
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_media_stream_url() {
        assert_eq!(
            media_stream_url("https://bridge.example.com/").unwrap(),
            "wss://bridge.example.com/media-stream"
        );
        assert_eq!(
            media_stream_url("http://localhost:8080").unwrap(),
            "ws://localhost:8080/media-stream"
        );
        assert!(media_stream_url("bridge.example.com").is_err());
        assert!(media_stream_url("ftp://bridge.example.com").is_err());
    }

    #[test]
    fn test_media_stream_url_keeps_prefix_and_query() {
        assert_eq!(
            media_stream_url("https://bridge.example.com/hooks?token=abc").unwrap(),
            "wss://bridge.example.com/hooks/media-stream?token=abc"
        );
        assert_eq!(
            media_stream_url("https://bridge.example.com/hooks/").unwrap(),
            "wss://bridge.example.com/hooks/media-stream"
        );
        assert_eq!(
            media_stream_url("HTTPS://Bridge.Example.com").unwrap(),
            "wss://bridge.example.com/media-stream"
        );
    }

    #[test]
    fn test_connect_response_escapes_url() {
        let xml = connect_response("wss://a.example.com/media-stream?x=1&y=2");
        assert!(xml.contains("<Stream url=\"wss://a.example.com/media-stream?x=1&amp;y=2\" />"));
    }

    #[actix_web::test]
    async fn test_incoming_call_endpoint() {
        let mut config = AppConfig::default();
        config.server.public_url = "https://calls.example.com".to_string();

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .route("/incoming-call", web::post().to(incoming_call)),
        )
        .await;

        let req = actix_test::TestRequest::post().uri("/incoming-call").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = actix_test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("<Connect>"));
        assert!(body.contains("wss://calls.example.com/media-stream"));
    }
}
