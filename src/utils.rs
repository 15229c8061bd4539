//! Helpers for naming downloaded files from HTTP responses and sequence indices

use std::path::Path;

/// Suggested filename from the response's Content-Disposition header.
///
/// Understands both `filename="..."` and the RFC 5987 `filename*=charset'lang'value`
/// form. Returns `None` when the header is missing or carries no filename.
pub fn suggested_filename(response: &reqwest::Response) -> Option<String> {
    let value = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded) {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Extension for a fetched page, decided from the response.
///
/// Order: the suggested filename's extension, the `Content-Type` MIME type, the last
/// path segment of `url`, then `default`. The result is lowercase and has no dot.
pub fn extension_from_response(response: &reqwest::Response, url: &str, default: &str) -> String {
    if let Some(ext) = suggested_filename(response).as_deref().and_then(file_extension) {
        return ext;
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if let Some(ext) = mime.and_then(mime_to_extension) {
        return ext.to_string();
    }

    if let Ok(parsed) = url::Url::parse(url)
        && let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && let Some(ext) = file_extension(last)
        && is_known_page_extension(&ext)
    {
        return ext;
    }

    default.to_string()
}

/// Map a MIME type (parameters allowed) to a file extension
pub fn mime_to_extension(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/heic" => "heic",
        "image/bmp" => "bmp",
        "text/plain" => "txt",
        "text/vtt" => "vtt",
        "application/x-subrip" => "srt",
        "video/mp2t" => "ts",
        "video/mp4" => "mp4",
        _ => return None,
    };
    Some(ext)
}

/// Extension inferred from raw image bytes (inline pages)
pub fn image_extension(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    Some(match format {
        image::ImageFormat::Jpeg => "jpg",
        other => *other.extensions_str().first()?,
    })
}

/// Whether `value` is an absolute http(s) URL
pub fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}

/// Zero-padded width for `count` sequence numbers, never narrower than `min`
pub fn index_width(count: usize, min: usize) -> usize {
    count.max(1).to_string().len().max(min)
}

/// Zero-padded sequence name, e.g. `indexed_name(7, 3) == "007"`
pub fn indexed_name(index: usize, width: usize) -> String {
    format!("{index:0width$}")
}

fn file_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_known_page_extension(ext: &str) -> bool {
    matches!(
        ext,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "heic" | "bmp" | "txt" | "vtt" | "srt"
    )
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Helper: start a mock server, register a response, make a GET request, return the response.
    async fn mock_response(
        path_str: &str,
        template: ResponseTemplate,
    ) -> (reqwest::Response, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(path_str))
            .respond_with(template)
            .mount(&server)
            .await;

        let url = format!("{}{}", server.uri(), path_str);
        let resp = reqwest::get(&url).await.unwrap();
        (resp, url)
    }

    #[tokio::test]
    async fn extension_from_quoted_content_disposition() {
        let (resp, url) = mock_response(
            "/page/1",
            ResponseTemplate::new(200)
                .insert_header("Content-Disposition", r#"inline; filename="001.WEBP""#)
                .insert_header("Content-Type", "image/png"),
        )
        .await;

        assert_eq!(suggested_filename(&resp).as_deref(), Some("001.WEBP"));
        assert_eq!(
            extension_from_response(&resp, &url, "png"),
            "webp",
            "suggested filename wins over MIME type"
        );
    }

    #[tokio::test]
    async fn rfc5987_filename_is_decoded() {
        let (resp, _) = mock_response(
            "/page/2",
            ResponseTemplate::new(200).insert_header(
                "Content-Disposition",
                "attachment; filename*=UTF-8''page%20two.jpg",
            ),
        )
        .await;

        assert_eq!(suggested_filename(&resp).as_deref(), Some("page two.jpg"));
    }

    #[tokio::test]
    async fn extension_falls_back_to_mime_type() {
        let (resp, url) = mock_response(
            "/img",
            ResponseTemplate::new(200).insert_header("Content-Type", "image/jpeg; charset=binary"),
        )
        .await;

        assert_eq!(extension_from_response(&resp, &url, "png"), "jpg");
    }

    #[tokio::test]
    async fn extension_falls_back_to_url_path() {
        let (resp, url) = mock_response("/chapter/003.gif", ResponseTemplate::new(200)).await;
        assert_eq!(extension_from_response(&resp, &url, "png"), "gif");
    }

    #[tokio::test]
    async fn extension_falls_back_to_default() {
        let (resp, url) = mock_response("/chapter/page.php", ResponseTemplate::new(200)).await;
        assert_eq!(extension_from_response(&resp, &url, "png"), "png");
    }

    #[test]
    fn mime_mapping() {
        assert_eq!(mime_to_extension("image/webp"), Some("webp"));
        assert_eq!(mime_to_extension("IMAGE/PNG"), Some("png"));
        assert_eq!(mime_to_extension("application/octet-stream"), None);
    }

    #[test]
    fn image_extension_sniffs_magic_bytes() {
        assert_eq!(image_extension(b"\x89PNG\r\n\x1a\n0000"), Some("png"));
        assert_eq!(image_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some("jpg"));
        assert_eq!(image_extension(b"GIF89a...."), Some("gif"));
        assert_eq!(image_extension(b"hello world"), None);
    }

    #[test]
    fn http_url_detection() {
        assert!(is_http_url("https://cdn.example.com/master.m3u8"));
        assert!(is_http_url("http://127.0.0.1:8080/x"));
        assert!(!is_http_url("episode-42"));
        assert!(!is_http_url("file:///tmp/x.m3u8"));
        assert!(!is_http_url(""));
    }

    #[test]
    fn index_names_sort_lexically() {
        assert_eq!(index_width(9, 3), 3);
        assert_eq!(index_width(1200, 3), 4);
        assert_eq!(index_width(0, 5), 5);

        let width = index_width(120, 5);
        let mut names: Vec<String> = [100, 7, 42, 0].iter().map(|&i| indexed_name(i, width)).collect();
        names.sort();
        assert_eq!(names, vec!["00000", "00007", "00042", "00100"]);
    }
}
