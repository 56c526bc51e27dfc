//! Topic/subscription naming and service-id namespacing, per §6.

use uuid::Uuid;

/// Reserved namespace every service id is prefixed with.
pub const NAMESPACE: &str = "octue.services";

const ANSWERS_SEGMENT: &str = "answers";

/// Prepends [`NAMESPACE`] to `id` unless it is already present, and rejects
/// an empty id. `id = None` generates a fresh UUIDv4.
pub fn namespaced_id(id: Option<&str>) -> Result<String, crate::error::RuntimeError> {
    let id = match id {
        None => Uuid::new_v4().to_string(),
        Some(id) if id.is_empty() => {
            return Err(crate::error::RuntimeError::InvalidArgument(
                "service id must not be empty".to_string(),
            ))
        }
        Some(id) => id.to_string(),
    };

    if id.starts_with(&format!("{NAMESPACE}.")) {
        Ok(id)
    } else {
        Ok(format!("{NAMESPACE}.{id}"))
    }
}

/// The long-lived topic a service listens to questions on.
pub fn server_topic_name(service_id: &str) -> String {
    service_id.to_string()
}

/// The ephemeral reply topic/subscription name for one question, per §6:
/// `<child-id>.answers.<question_uuid>`.
pub fn reply_channel_name(child_id: &str, question_uuid: &str) -> String {
    format!("{child_id}.{ANSWERS_SEGMENT}.{question_uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_uuid_when_id_is_absent() {
        let id = namespaced_id(None).unwrap();
        assert!(id.starts_with("octue.services."));
        assert!(Uuid::parse_str(id.strip_prefix("octue.services.").unwrap()).is_ok());
    }

    #[test]
    fn namespace_appears_at_most_once() {
        let once = namespaced_id(Some("my-service")).unwrap();
        assert_eq!(once, "octue.services.my-service");

        let already_namespaced = namespaced_id(Some(&once)).unwrap();
        assert_eq!(already_namespaced, once);
    }

    #[test]
    fn rejects_empty_id() {
        assert!(namespaced_id(Some("")).is_err());
    }

    #[test]
    fn reply_channel_is_named_per_spec() {
        let name = reply_channel_name("octue.services.child", "abc-123");
        assert_eq!(name, "octue.services.child.answers.abc-123");
    }
}
