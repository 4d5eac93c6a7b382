//! Common object traversal structures for AWS S3.
//!
//! This module doesn't contain anything special beyond a pseudo-iterator
//! to walk over objects (or common prefixes) in S3 in a more idiomatic
//! manner, hiding the continuation token handling of `ListObjectsV2`.
use crate::types::UtilResult;
use rusoto_s3::*;

use std::collections::VecDeque;

/// Pseudo `Iterator` structure to walk over `Object` types in AWS S3.
///
/// As this is a fallible iteration, a `for` style loop cannot be used
/// easily. Instead, this pattern must be used:
///
/// ```rust,ignore
/// let mut walker = ObjectWalker::new(&s3, bucket, Some(prefix));
///
/// while let Some(object) = walker.next().await? {
///     // do something...
/// }
/// ```
pub struct ObjectWalker<'a> {
    s3: &'a S3Client,
    token: Option<String>,
    bucket: String,
    prefix: Option<String>,
    delimiter: Option<String>,
    objects: VecDeque<Object>,
    prefixes: VecDeque<String>,
    finished: bool,
}

impl<'a> ObjectWalker<'a> {
    /// Construct a new `ObjectWalker` for a bucket/prefix pair.
    pub fn new(s3: &'a S3Client, bucket: String, prefix: Option<String>) -> Self {
        Self {
            s3,
            bucket,
            prefix,
            delimiter: None,
            token: None,
            objects: VecDeque::new(),
            prefixes: VecDeque::new(),
            finished: false,
        }
    }

    /// Groups keys by a delimiter, exposing the groups as common prefixes.
    pub fn delimited(mut self, delimiter: &str) -> Self {
        self.delimiter = Some(delimiter.to_string());
        self
    }

    /// Attempts to fetch the next `Object` in the S3 archives.
    ///
    /// Calling this method does not guarantee a call will be made to AWS;
    /// there may already be buffered data to be returned immediately.
    pub async fn next(&mut self) -> UtilResult<Option<Object>> {
        loop {
            if let Some(object) = self.objects.pop_front() {
                return Ok(Some(object));
            }

            if self.finished {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    /// Attempts to fetch the next common prefix of a delimited walk.
    pub async fn next_prefix(&mut self) -> UtilResult<Option<String>> {
        loop {
            if let Some(prefix) = self.prefixes.pop_front() {
                return Ok(Some(prefix));
            }

            if self.finished {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    /// Fetches a single page of results into the internal buffers.
    async fn fetch_page(&mut self) -> UtilResult<()> {
        let request = ListObjectsV2Request {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            delimiter: self.delimiter.clone(),
            continuation_token: self.token.clone(),
            ..ListObjectsV2Request::default()
        };

        let response = self.s3.list_objects_v2(request).await?;

        self.objects.extend(response.contents.unwrap_or_default());
        self.prefixes.extend(
            response
                .common_prefixes
                .unwrap_or_default()
                .into_iter()
                .filter_map(|common| common.prefix),
        );

        // a missing token means this was the last page
        self.token = response.next_continuation_token;
        self.finished = self.token.is_none();

        Ok(())
    }
}
