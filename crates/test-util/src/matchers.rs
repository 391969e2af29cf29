// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! This module contains a collection of matchers

pub use googletest::matchers::*;

pub use storage_codec::storage_decoded;

mod storage_codec {
    use std::fmt::Debug;
    use std::marker::PhantomData;

    use bytes::Buf;
    use googletest::matcher::{Matcher, MatcherResult};

    use quota_types::storage::{StorageCodec, StorageDecode};

    struct StorageDecodeMatcher<InnerMatcher, B>(InnerMatcher, PhantomData<B>);

    impl<T, B, InnerMatcher> Matcher for StorageDecodeMatcher<InnerMatcher, B>
    where
        T: StorageDecode + Debug,
        B: Buf + Clone + Debug,
        InnerMatcher: Matcher<ActualT = T>,
    {
        type ActualT = B;

        fn matches(&self, actual: &Self::ActualT) -> MatcherResult {
            let mut buf = actual.clone();
            match StorageCodec::decode::<T, _>(&mut buf) {
                Ok(value) if !buf.has_remaining() => self.0.matches(&value),
                _ => MatcherResult::NoMatch,
            }
        }

        fn describe(&self, matcher_result: MatcherResult) -> String {
            match matcher_result {
                MatcherResult::Match => {
                    format!(
                        "can be decoded with the storage codec which {:?}",
                        self.0.describe(MatcherResult::Match)
                    )
                }
                MatcherResult::NoMatch => {
                    "cannot be decoded with the storage codec".to_string()
                }
            }
        }
    }

    /// Decodes a value written with [`StorageCodec`] and matches it against `inner`. Trailing
    /// bytes after the value fail the match.
    pub fn storage_decoded<T, B>(inner: impl Matcher<ActualT = T>) -> impl Matcher<ActualT = B>
    where
        T: StorageDecode + Debug,
        B: Buf + Clone + Debug,
    {
        StorageDecodeMatcher(inner, PhantomData)
    }

}
