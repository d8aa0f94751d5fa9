use chrono::NaiveDateTime;
use uuid::Uuid;

/// Two adjacent messages collapse into one visual run when the same author
/// posts them less than ten minutes apart.
pub const GROUP_WINDOW_SECS: i64 = 600;

/// For a list ordered by creation time ascending, returns one flag per
/// message: `true` when the message continues the previous author's run.
pub fn grouped_flags(messages: &[(Uuid, NaiveDateTime)]) -> Vec<bool> {
    let mut flags = Vec::with_capacity(messages.len());
    for (idx, (author, created_at)) in messages.iter().enumerate() {
        let grouped = idx > 0 && {
            let (prev_author, prev_created_at) = &messages[idx - 1];
            prev_author == author
                && created_at.signed_duration_since(*prev_created_at).num_seconds()
                    < GROUP_WINDOW_SECS
        };
        flags.push(grouped);
    }
    flags
}
