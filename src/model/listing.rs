//! Raw size/digest listing blocks.
//!
//! Games with hundreds of files list them compactly instead of one JSON
//! object each:
//!
//! ```text
//! size_and_md5:   18689235 85fc9cee2035b66290da1e33be2ac86b id1/pak0.pak
//! sha1sums:       36b42dc7b6313fd9cabc0be8b9e9864840929735 id1/pak0.pak
//! group member:   18689235 _ id1/pak0.pak
//! ```

use crate::hash::DigestAlgorithm;

use super::GameDataError;

/// One parsed listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<(DigestAlgorithm, String)>,
}

/// Split off the first `n - 1` whitespace-separated fields; the remainder
/// (which may contain spaces) is the last field.
fn split_fields(line: &str, n: usize) -> Option<Vec<&str>> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim();

    for _ in 1..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }

    if rest.is_empty() {
        return None;
    }
    fields.push(rest);
    Some(fields)
}

fn content_lines(block: &str) -> impl Iterator<Item = &str> {
    block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Parse a `size md5 name` block.
pub fn parse_size_and_md5(block: &str) -> Result<Vec<ListingRecord>, GameDataError> {
    content_lines(block)
        .map(|line| {
            parse_size_record(line).ok_or_else(|| GameDataError::MalformedListing {
                block: "size_and_md5".to_string(),
                line: line.to_string(),
            })
        })
        .collect()
}

/// Parse a `digest name` block for one algorithm.
pub fn parse_digest_list(
    block: &str,
    algorithm: DigestAlgorithm,
) -> Result<Vec<ListingRecord>, GameDataError> {
    content_lines(block)
        .map(|line| {
            let malformed = || GameDataError::MalformedListing {
                block: format!("{}sums", algorithm),
                line: line.to_string(),
            };
            let fields = split_fields(line, 2).ok_or_else(malformed)?;
            if !algorithm.is_valid_hex(fields[0]) {
                return Err(malformed());
            }
            Ok(ListingRecord {
                name: fields[1].to_string(),
                size: None,
                digest: Some((algorithm, fields[0].to_ascii_lowercase())),
            })
        })
        .collect()
}

/// Parse `size md5 name` or `size _ name`.
///
/// Returns `None` for anything else, which group member parsing treats as
/// a bare file name.
pub fn parse_size_record(line: &str) -> Option<ListingRecord> {
    let fields = split_fields(line, 3)?;
    let size = fields[0].parse::<u64>().ok()?;

    let digest = match fields[1] {
        "_" | "-" => None,
        md5 if DigestAlgorithm::Md5.is_valid_hex(md5) => {
            Some((DigestAlgorithm::Md5, md5.to_ascii_lowercase()))
        }
        _ => return None,
    };

    Some(ListingRecord {
        name: fields[2].to_string(),
        size: Some(size),
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "85fc9cee2035b66290da1e33be2ac86b";

    #[test]
    fn test_size_and_md5_block() {
        let block = format!("# quake 1.06\n18689235 {}  id1/pak0.pak\n\n", MD5);
        let records = parse_size_and_md5(&block).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "id1/pak0.pak");
        assert_eq!(records[0].size, Some(18689235));
        assert_eq!(
            records[0].digest,
            Some((DigestAlgorithm::Md5, MD5.to_string()))
        );
    }

    #[test]
    fn test_names_may_contain_spaces() {
        let record = parse_size_record("10 _ Read Me.txt").unwrap();
        assert_eq!(record.name, "Read Me.txt");
        assert_eq!(record.digest, None);
    }

    #[test]
    fn test_bare_name_is_not_a_record() {
        assert!(parse_size_record("pak0.pak").is_none());
        assert!(parse_size_record("1 two three").is_none());
    }

    #[test]
    fn test_malformed_line_rejected() {
        let err = parse_size_and_md5("not-a-size abc name").unwrap_err();
        assert!(matches!(err, GameDataError::MalformedListing { .. }));

        let err = parse_digest_list("tooshort name", DigestAlgorithm::Sha1).unwrap_err();
        assert!(matches!(err, GameDataError::MalformedListing { .. }));
    }

    #[test]
    fn test_digest_list() {
        let sha1 = "36b42dc7b6313fd9cabc0be8b9e9864840929735";
        let records = parse_digest_list(&format!("{} id1/pak0.pak", sha1.to_uppercase()), DigestAlgorithm::Sha1).unwrap();
        assert_eq!(records[0].digest, Some((DigestAlgorithm::Sha1, sha1.to_string())));
    }
}
