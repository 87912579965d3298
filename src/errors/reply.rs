// Copyright (C) 2019-2021 the docnet Developers
// This file is part of the docnet library.

// The docnet library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The docnet library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the docnet library. If not, see <https://www.gnu.org/licenses/>.

use crate::{codec::Document, message::Reply};

use thiserror::Error;

const DUPLICATE_KEY_CODES: [i64; 2] = [11000, 11001];
const TIME_LIMIT_CODES: [i64; 3] = [50, 13475, 16711];
const DURABILITY_KEYS: [&str; 4] = ["wtimeout", "wnote", "jnote", "badGLE"];

#[derive(Debug, Error)]
pub enum ReplyFailure {
    #[error("the command failed: {}", _0)]
    CommandFailed(String),

    #[error("the server no longer knows cursor {}", _0)]
    CursorNotFound(i64),

    #[error("duplicate key: {}", _0)]
    DuplicateKey(String),

    #[error("the requested durability could not be satisfied: {}", _0)]
    DurabilityFailure(String),

    #[error("the operation exceeded its time limit (code {})", _0)]
    MaximumTimeLimitExceeded(i64),

    #[error("the query failed: {}", _0)]
    QueryFailed(String),

    #[error("the shard configuration is stale: {}", _0)]
    ShardConfigStale(String),
}

/// Inspects a decoded reply for a server-side failure.
///
/// Flags are checked first, then the leading document is examined for an
/// error code, an error message, or a non-ok command status.
pub fn classify_reply(reply: &Reply) -> Option<ReplyFailure> {
    if reply.flags.cursor_not_found {
        return Some(ReplyFailure::CursorNotFound(reply.cursor_id));
    }
    if reply.flags.shard_config_stale {
        return Some(ReplyFailure::ShardConfigStale(error_message(reply.first_document())));
    }

    let document = match reply.first_document() {
        Some(document) => document,
        None if reply.flags.query_failed => return Some(ReplyFailure::QueryFailed(String::new())),
        None => return None,
    };

    let code = error_code(document);
    let message = error_message(Some(document));

    if let Some(code) = code {
        if DUPLICATE_KEY_CODES.contains(&code) {
            return Some(ReplyFailure::DuplicateKey(message));
        }
        if TIME_LIMIT_CODES.contains(&code) {
            return Some(ReplyFailure::MaximumTimeLimitExceeded(code));
        }
    }
    if message.starts_with("E11000") {
        return Some(ReplyFailure::DuplicateKey(message));
    }
    if DURABILITY_KEYS.iter().any(|key| durability_marker(document, key, &message)) {
        return Some(ReplyFailure::DurabilityFailure(message));
    }
    if reply.flags.query_failed {
        return Some(ReplyFailure::QueryFailed(message));
    }
    if matches!(document.get_f64("ok"), Some(ok) if ok == 0.0) {
        return Some(ReplyFailure::CommandFailed(message));
    }

    None
}

fn error_code(document: &Document) -> Option<i64> {
    document.get_i64("code").or_else(|| document.get_i64("assertionCode"))
}

fn error_message(document: Option<&Document>) -> String {
    let document = match document {
        Some(document) => document,
        None => return String::new(),
    };
    for key in &["$err", "errmsg", "err"] {
        if let Some(message) = document.get_str(key) {
            return message.to_owned();
        }
    }
    String::new()
}

fn durability_marker(document: &Document, key: &str, message: &str) -> bool {
    // `wtimeout: false` in a get-last-error reply is a clean result, not a failure.
    match document.get(key) {
        Some(value) => !matches!(value.as_bool(), Some(false)) && !value.is_null(),
        None => !message.is_empty() && message.contains(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{doc, message::ReplyFlags};

    fn reply_with(documents: Vec<Document>, flags: ReplyFlags) -> Reply {
        Reply {
            response_to: 1,
            flags,
            cursor_id: 0,
            starting_from: 0,
            documents,
        }
    }

    #[test]
    fn classifies_duplicate_key_by_code() {
        let reply = reply_with(vec![doc! { "ok" => 1, "code" => 11000, "err" => "dup" }], Default::default());
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::DuplicateKey(_))));
    }

    #[test]
    fn classifies_duplicate_key_by_message_prefix() {
        let reply = reply_with(
            vec![doc! { "ok" => 1, "err" => "E11000 duplicate key error" }],
            Default::default(),
        );
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::DuplicateKey(_))));
    }

    #[test]
    fn classifies_time_limit_codes() {
        for code in &[50i64, 13475, 16711] {
            let reply = reply_with(vec![doc! { "ok" => 0, "code" => *code }], Default::default());
            assert!(matches!(
                classify_reply(&reply),
                Some(ReplyFailure::MaximumTimeLimitExceeded(c)) if c == *code
            ));
        }
    }

    #[test]
    fn classifies_durability_failure() {
        let reply = reply_with(
            vec![doc! { "ok" => 1, "wtimeout" => true, "err" => "waiting for replication timed out" }],
            Default::default(),
        );
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::DurabilityFailure(_))));
    }

    #[test]
    fn clean_get_last_error_is_not_a_failure() {
        let reply = reply_with(vec![doc! { "ok" => 1, "wtimeout" => false }], Default::default());
        assert!(classify_reply(&reply).is_none());
    }

    #[test]
    fn classifies_query_failed_flag() {
        let flags = ReplyFlags {
            query_failed: true,
            ..Default::default()
        };
        let reply = reply_with(vec![doc! { "$err" => "bad query" }], flags);
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::QueryFailed(m)) if m == "bad query"));
    }

    #[test]
    fn classifies_cursor_not_found_flag() {
        let flags = ReplyFlags {
            cursor_not_found: true,
            ..Default::default()
        };
        let reply = reply_with(vec![], flags);
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::CursorNotFound(_))));
    }

    #[test]
    fn classifies_non_ok_command() {
        let reply = reply_with(vec![doc! { "ok" => 0, "errmsg" => "unknown command" }], Default::default());
        assert!(matches!(classify_reply(&reply), Some(ReplyFailure::CommandFailed(m)) if m == "unknown command"));
    }

    #[test]
    fn ordinary_result_documents_pass() {
        let reply = reply_with(vec![doc! { "_id" => "a", "value" => 42 }], Default::default());
        assert!(classify_reply(&reply).is_none());
    }
}
