// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic byte decoding with an optional LRU cache.
//!
//! Hot topics repeat on nearly every frame; the cached reader maps the raw
//! bytes to a shared `Arc<str>` so repeated frames skip UTF-8 validation and
//! allocation. Topics that are not valid UTF-8 are rejected, never cached.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::error::ProtocolError;

/// Decodes topic bytes to strings. Owned by a single read path.
pub enum TopicReader {
    Plain,
    Cached {
        cache: LruCache<Vec<u8>, Arc<str>>,
        hits: u64,
        misses: u64,
    },
}

impl TopicReader {
    /// `None` disables caching.
    pub fn new(cache_capacity: Option<NonZeroUsize>) -> Self {
        match cache_capacity {
            Some(capacity) => TopicReader::Cached {
                cache: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            },
            None => TopicReader::Plain,
        }
    }

    pub fn read(&mut self, bytes: &[u8]) -> Result<Arc<str>, ProtocolError> {
        match self {
            TopicReader::Plain => decode(bytes),
            TopicReader::Cached {
                cache,
                hits,
                misses,
            } => {
                if let Some(topic) = cache.get(bytes) {
                    *hits += 1;
                    return Ok(Arc::clone(topic));
                }
                *misses += 1;
                let topic = decode(bytes)?;
                cache.put(bytes.to_vec(), Arc::clone(&topic));
                Ok(topic)
            }
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, TopicReader::Cached { .. })
    }

    /// Cache (hits, misses); zero for the plain reader.
    pub fn cache_stats(&self) -> (u64, u64) {
        match self {
            TopicReader::Plain => (0, 0),
            TopicReader::Cached { hits, misses, .. } => (*hits, *misses),
        }
    }
}

impl std::fmt::Debug for TopicReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicReader::Plain => f.write_str("TopicReader::Plain"),
            TopicReader::Cached { cache, hits, misses } => f
                .debug_struct("TopicReader::Cached")
                .field("len", &cache.len())
                .field("capacity", &cache.cap())
                .field("hits", hits)
                .field("misses", misses)
                .finish(),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Arc<str>, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(Arc::from)
        .map_err(|e| ProtocolError::InvalidTopic {
            valid_up_to: e.valid_up_to(),
        })
}
