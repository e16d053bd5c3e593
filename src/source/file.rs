//! Desired endpoints from a JSON document.

use std::{fs, path::PathBuf};

use crate::{
    cancel::CancelToken,
    endpoint::{normalize_dns_name, Endpoint},
};

use super::{Source, SourceError};

/// A source reading the full desired endpoint set from a JSON file on every
/// call. The file holds a plain array of endpoint objects:
///
/// ```json
/// [{"dnsName": "www.example.org", "recordType": "CNAME", "targets": ["lb.example.com"]}]
/// ```
///
/// This source does not watch the file; each reconciliation reads it again.
///
/// To create a new source, use the [`FileSource::from_config()`] function.
#[derive(Debug)]
#[non_exhaustive]
pub struct FileSource {
    path: PathBuf,
}

/// Configuration for [`FileSource`]. Must be supplied when creating a [`FileSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSourceConfig {
    /// Path of the JSON document holding the desired endpoints.
    pub path: PathBuf,
}

impl Source for FileSource {
    fn endpoints(&self, ctx: &CancelToken) -> Result<Vec<Endpoint>, SourceError> {
        if ctx.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| SourceError::Io(e.to_string()))?;
        let mut endpoints: Vec<Endpoint> =
            serde_json::from_str(&raw).map_err(|e| SourceError::Parse(e.to_string()))?;
        for ep in &mut endpoints {
            ep.dns_name = normalize_dns_name(&ep.dns_name);
        }
        Ok(endpoints)
    }
}

impl FileSource {
    /// Create a new [`FileSource`] with the supplied configuration.
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_config(config: &FileSourceConfig) -> Result<Box<dyn Source>, SourceError> {
        let source = FileSource {
            path: config.path.clone(),
        };
        match source.endpoints(&CancelToken::new()) {
            Ok(_) => Ok(Box::new(source)),
            Err(e) => Err(SourceError::Internal(format!(
                "could not initialize FileSource from {}: {}",
                config.path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use totems::assert_ok;

    use super::*;
    use crate::endpoint::RecordType;

    fn write_source_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn should_read_endpoints_from_json() {
        let file = write_source_file(
            r#"[
                {"dnsName": "WWW.Example.org.", "recordType": "CNAME", "targets": ["lb.example.com"]},
                {"dnsName": "api.example.org", "recordType": "A", "targets": ["1.1.1.1"], "recordTTL": 300}
            ]"#,
        );
        let source = FileSource::from_config(&FileSourceConfig {
            path: file.path().to_path_buf(),
        })
        .unwrap();

        let endpoints = source.endpoints(&CancelToken::new()).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].dns_name, "www.example.org");
        assert_eq!(endpoints[0].record_type, RecordType::Cname);
        assert_eq!(endpoints[1].record_ttl, 300);
    }

    #[test]
    fn should_accept_an_empty_list() {
        let file = write_source_file("[]");
        let source = FileSource::from_config(&FileSourceConfig {
            path: file.path().to_path_buf(),
        });
        assert_ok!(source);
    }

    #[test]
    fn should_fail_on_unparseable_documents() {
        let file = write_source_file("{\"not\": \"a list\"}");
        let result = FileSource::from_config(&FileSourceConfig {
            path: file.path().to_path_buf(),
        });
        assert!(matches!(result, Err(SourceError::Internal(_))));
    }

    #[test]
    fn should_fail_on_missing_files() {
        let result = FileSource::from_config(&FileSourceConfig {
            path: PathBuf::from("/does/not/exist.json"),
        });
        assert!(matches!(result, Err(SourceError::Internal(_))));
    }
}
