//! Remote change notifications.
//!
//! [`RawNotification`] is the shape delivered by a transport (JSON,
//! camelCase). [`Notification`] is the validated form the reconciler applies.

use crate::{
    mirror::Anchor,
    record::{Priority, RecordBody},
    Error, RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    /// `added`, `changed`, `removed`, `moved` or `ready`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Ordering value of the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    /// Id of the record this one follows (`None` means first position)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceding_sibling_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RawNotification {
    /// The initial-sync sentinel.
    pub fn ready() -> Self {
        Self {
            kind: "ready".to_string(),
            id: None,
            priority: None,
            preceding_sibling_id: None,
            payload: None,
        }
    }
}

/// A validated notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added {
        id: RecordId,
        priority: Priority,
        after: Anchor,
        body: RecordBody,
    },
    Changed {
        id: RecordId,
        body: RecordBody,
    },
    Removed {
        id: RecordId,
    },
    Moved {
        id: RecordId,
        priority: Priority,
        after: Anchor,
        /// Current body, when the transport sends one along
        body: Option<RecordBody>,
    },
    /// Initial synchronization is complete
    Ready,
}

impl Notification {
    /// Record id the notification refers to (`None` for `Ready`).
    pub fn id(&self) -> Option<&str> {
        match self {
            Notification::Added { id, .. }
            | Notification::Changed { id, .. }
            | Notification::Removed { id }
            | Notification::Moved { id, .. } => Some(id),
            Notification::Ready => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Added { .. } => "added",
            Notification::Changed { .. } => "changed",
            Notification::Removed { .. } => "removed",
            Notification::Moved { .. } => "moved",
            Notification::Ready => "ready",
        }
    }
}

fn malformed(kind: &str, id: Option<&str>, reason: impl std::fmt::Display) -> Error {
    match id {
        Some(id) => Error::MalformedNotification(format!("{kind} '{id}': {reason}")),
        None => Error::MalformedNotification(format!("{kind}: {reason}")),
    }
}

impl TryFrom<RawNotification> for Notification {
    type Error = Error;

    fn try_from(raw: RawNotification) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_str();
        if kind == "ready" {
            return Ok(Notification::Ready);
        }
        if !matches!(kind, "added" | "changed" | "removed" | "moved") {
            return Err(malformed(kind, raw.id.as_deref(), "unknown kind"));
        }

        let id = match raw.id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(malformed(kind, None, "missing id")),
        };

        let priority = match &raw.priority {
            Some(value) => Priority::from_value(value).map_err(|e| malformed(kind, Some(&id), e))?,
            None => Priority::None,
        };
        let body = match raw.payload {
            Some(value) => {
                Some(RecordBody::from_value(value).map_err(|e| malformed(kind, Some(&id), e))?)
            }
            None => None,
        };
        let after = Anchor::from_preceding(raw.preceding_sibling_id);

        match kind {
            "added" => {
                let body = body.ok_or_else(|| malformed(kind, Some(&id), "missing payload"))?;
                Ok(Notification::Added {
                    id,
                    priority,
                    after,
                    body,
                })
            }
            "changed" => {
                let body = body.ok_or_else(|| malformed(kind, Some(&id), "missing payload"))?;
                Ok(Notification::Changed { id, body })
            }
            "removed" => Ok(Notification::Removed { id }),
            _ => Ok(Notification::Moved {
                id,
                priority,
                after,
                body,
            }),
        }
    }
}

/// Fails only for a priority JSON cannot carry.
impl TryFrom<Notification> for RawNotification {
    type Error = Error;

    fn try_from(notification: Notification) -> Result<Self, Self::Error> {
        let kind = notification.kind().to_string();
        Ok(match notification {
            Notification::Added {
                id,
                priority,
                after,
                body,
            } => Self {
                kind,
                id: Some(id),
                priority: Some(priority.to_value()?),
                preceding_sibling_id: after.preceding_id().map(str::to_string),
                payload: Some(body.to_value()),
            },
            Notification::Changed { id, body } => Self {
                kind,
                id: Some(id),
                priority: None,
                preceding_sibling_id: None,
                payload: Some(body.to_value()),
            },
            Notification::Removed { id } => Self {
                kind,
                id: Some(id),
                priority: None,
                preceding_sibling_id: None,
                payload: None,
            },
            Notification::Moved {
                id,
                priority,
                after,
                body,
            } => Self {
                kind,
                id: Some(id),
                priority: Some(priority.to_value()?),
                preceding_sibling_id: after.preceding_id().map(str::to_string),
                payload: body.map(|b| b.to_value()),
            },
            Notification::Ready => RawNotification::ready(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Notification, Error> {
        let raw: RawNotification = serde_json::from_value(value).unwrap();
        Notification::try_from(raw)
    }

    #[test]
    fn parse_added() {
        let n = parse(json!({
            "kind": "added",
            "id": "b",
            "priority": 2,
            "precedingSiblingId": "a",
            "payload": {"title": "eggs"}
        }))
        .unwrap();

        match n {
            Notification::Added {
                id,
                priority,
                after,
                body,
            } => {
                assert_eq!(id, "b");
                assert_eq!(priority, Priority::from(2));
                assert_eq!(after, Anchor::After("a".into()));
                assert_eq!(body.to_value(), json!({"title": "eggs"}));
            }
            other => panic!("expected added, got {other:?}"),
        }
    }

    #[test]
    fn parse_ready_and_removed() {
        assert_eq!(parse(json!({"kind": "ready"})).unwrap(), Notification::Ready);
        assert_eq!(
            parse(json!({"kind": "removed", "id": "x"})).unwrap(),
            Notification::Removed { id: "x".into() }
        );
    }

    #[test]
    fn moved_without_sibling_anchors_first() {
        let n = parse(json!({"kind": "moved", "id": "x", "priority": "k"})).unwrap();
        assert_eq!(
            n,
            Notification::Moved {
                id: "x".into(),
                priority: Priority::from("k"),
                after: Anchor::First,
                body: None,
            }
        );
    }

    #[test]
    fn malformed_notifications() {
        let cases = vec![
            json!({"kind": "exploded", "id": "x"}),
            json!({"kind": "added", "payload": {"a": 1}}),
            json!({"kind": "added", "id": "", "payload": {"a": 1}}),
            json!({"kind": "added", "id": "x"}),
            json!({"kind": "changed", "id": "x"}),
            json!({"kind": "added", "id": "x", "payload": null}),
            json!({"kind": "moved", "id": "x", "priority": [1, 2]}),
        ];
        for case in cases {
            let result = parse(case.clone());
            assert!(
                matches!(result, Err(Error::MalformedNotification(_))),
                "expected malformed for {case}"
            );
        }
    }

    #[test]
    fn wire_conversion_preserves_meaning() {
        let n = Notification::Added {
            id: "b".into(),
            priority: Priority::from("m"),
            after: Anchor::After("a".into()),
            body: RecordBody::Primitive(json!(true)),
        };
        let raw = RawNotification::try_from(n.clone()).unwrap();
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["precedingSiblingId"], json!("a"));
        assert_eq!(Notification::try_from(raw).unwrap(), n);
    }

    #[test]
    fn non_finite_priority_has_no_wire_form() {
        let n = Notification::Moved {
            id: "b".into(),
            priority: Priority::from(f64::NAN),
            after: Anchor::First,
            body: None,
        };
        assert!(matches!(
            RawNotification::try_from(n),
            Err(Error::InvalidPayload(_))
        ));
    }
}
