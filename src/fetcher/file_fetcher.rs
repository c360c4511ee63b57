use std::fs::File;
use std::io::BufReader;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::FetchError;
use crate::fetcher::{FetchRequest, ResponseBody, Transport, TransportResponse};

/// Serves `file://` feeds. The file's modification time plays the part of
/// `Last-Modified`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn execute(&self, request: &FetchRequest) -> Result<TransportResponse, FetchError> {
        let path = request
            .url()
            .to_file_path()
            .map_err(|_| FetchError::InvalidFilePath(request.url().to_string()))?;

        let file = File::open(&path)?;
        let modified = file.metadata()?.modified().ok().map(DateTime::<Utc>::from);

        if let (Some(since), Some(modified)) = (request.if_modified_since(), modified) {
            if modified <= since {
                debug!(path = %path.display(), "File not modified");
                return Ok(TransportResponse::NotModified);
            }
        }

        let content_encoding = path
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.eq_ignore_ascii_case("gz"))
            .map(|_| "gzip".to_string());

        Ok(TransportResponse::Body(ResponseBody {
            reader: Box::new(BufReader::new(file)),
            content_type: None,
            content_encoding,
            last_modified: modified,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeedDescriptor;
    use chrono::TimeZone;
    use std::io::Read;
    use std::time::SystemTime;
    use url::Url;

    fn request_for(path: &std::path::Path) -> FetchRequest {
        let feed = FeedDescriptor::new(Url::from_file_path(path).unwrap());
        FetchRequest::open(&feed).unwrap()
    }

    fn set_mtime(path: &std::path::Path, when: DateTime<Utc>) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::from(when)).unwrap();
    }

    #[test]
    fn test_reads_file_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(&path, "<rss/>").unwrap();
        let mtime = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        set_mtime(&path, mtime);

        let TransportResponse::Body(mut body) = FileTransport.execute(&request_for(&path)).unwrap() else {
            panic!("expected a body");
        };

        let mut content = String::new();
        body.reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "<rss/>");
        assert_eq!(body.last_modified, Some(mtime));
        assert_eq!(body.content_encoding, None);
    }

    #[test]
    fn test_not_modified_since_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(&path, "<rss/>").unwrap();
        let mtime = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        set_mtime(&path, mtime);

        let mut request = request_for(&path);
        request.set_if_modified_since(Some(mtime));

        assert!(matches!(
            FileTransport.execute(&request).unwrap(),
            TransportResponse::NotModified
        ));
    }

    #[test]
    fn test_gz_extension_reports_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml.GZ");
        std::fs::write(&path, b"\x1f\x8b").unwrap();

        let TransportResponse::Body(body) = FileTransport.execute(&request_for(&path)).unwrap() else {
            panic!("expected a body");
        };
        assert_eq!(body.content_encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_for(&dir.path().join("absent.xml"));

        assert!(matches!(FileTransport.execute(&request), Err(FetchError::Io(_))));
    }
}
