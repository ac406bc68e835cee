pub fn counter_key(doc_id: &str) -> String {
    format!("doc:{doc_id}:counter")
}

pub fn events_key(doc_id: &str) -> String {
    format!("doc:{doc_id}:events")
}

pub fn connections_key(doc_id: &str) -> String {
    format!("doc:{doc_id}:connections")
}

pub fn cursor_key(doc_id: &str, user_id: &str, author_id: &str) -> String {
    format!("doc:{doc_id}:user:{user_id}:author:{author_id}")
}

pub fn last_message_key(doc_id: &str, user_id: &str) -> String {
    format!("doc:{doc_id}:user:{user_id}:message")
}

pub fn channel_key(doc_id: &str) -> String {
    format!("chanDocUpdates:{doc_id}")
}
