//! Local mirror of the process manager's process table.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{ChildProcess, Notification, NotificationType, Process};

/// Processes keyed by pid.
pub type ProcessTable = BTreeMap<u32, Process>;

/// Why a notification could not be applied to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// A field the kind requires was absent.
    MissingField(&'static str),
    /// `data` did not decode into the expected type.
    BadData(String),
    /// The notification refers to a process the mirror does not track.
    UnknownPid(u32),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing {field}"),
            Self::BadData(detail) => write!(f, "bad data: {detail}"),
            Self::UnknownPid(pid) => write!(f, "untracked pid {pid}"),
        }
    }
}

/// Apply one notification to `table`.
///
/// `OPEN_FILE_REQUEST` carries no process state and is a no-op.
pub fn apply_notification(table: &mut ProcessTable, notif: &Notification) -> Result<(), ApplyError> {
    match notif.kind {
        NotificationType::ProcessExited => {
            let pid = notif.pid.ok_or(ApplyError::MissingField("pid"))?;
            table.remove(&pid).map(drop).ok_or(ApplyError::UnknownPid(pid))
        }
        NotificationType::ProcessStarted => {
            let proc: Process = decode(&notif.data)?;
            let _ = table.insert(proc.pid, proc);
            Ok(())
        }
        NotificationType::ChildProcessStarted => {
            let pid = notif.pid.ok_or(ApplyError::MissingField("pid"))?;
            let child: ChildProcess = decode(&notif.data)?;
            let parent = table.get_mut(&pid).ok_or(ApplyError::UnknownPid(pid))?;
            let _ = parent.children.insert(child.pid, child);
            Ok(())
        }
        NotificationType::ChildProcessExited => {
            let pid = notif.pid.ok_or(ApplyError::MissingField("pid"))?;
            let child_pid = notif
                .data
                .get("pid")
                .and_then(Value::as_u64)
                .and_then(|p| u32::try_from(p).ok())
                .ok_or(ApplyError::MissingField("data.pid"))?;
            let parent = table.get_mut(&pid).ok_or(ApplyError::UnknownPid(pid))?;
            parent.children.remove(&child_pid).map(drop).ok_or(ApplyError::UnknownPid(child_pid))
        }
        NotificationType::PortsChanged => {
            let pid = notif.pid.ok_or(ApplyError::MissingField("pid"))?;
            let ports: Vec<u16> = decode(&notif.data)?;
            if let Some(proc) = table.get_mut(&pid) {
                proc.ports = ports;
                return Ok(());
            }
            let child = table
                .values_mut()
                .find_map(|p| p.children.get_mut(&pid))
                .ok_or(ApplyError::UnknownPid(pid))?;
            child.ports = ports;
            Ok(())
        }
        NotificationType::OpenFileRequest => Ok(()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, ApplyError> {
    serde_json::from_value(data.clone()).map_err(|e| ApplyError::BadData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notif(kind: NotificationType, pid: Option<u32>, data: Value) -> Notification {
        Notification { pid, ppid: None, kind, data }
    }

    fn started(pid: u32) -> Notification {
        notif(
            NotificationType::ProcessStarted,
            Some(pid),
            json!({"pid": pid, "name": "sh", "cmd": "sh", "args": [], "ports": [], "children": {}}),
        )
    }

    #[test]
    fn started_then_exited() {
        let mut t = ProcessTable::new();
        apply_notification(&mut t, &started(42)).unwrap();
        assert!(t.contains_key(&42));
        apply_notification(&mut t, &notif(NotificationType::ProcessExited, Some(42), Value::Null)).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn ports_replace_on_process() {
        let mut t = ProcessTable::new();
        apply_notification(&mut t, &started(42)).unwrap();
        apply_notification(&mut t, &notif(NotificationType::PortsChanged, Some(42), json!([8080, 9229]))).unwrap();
        assert_eq!(t[&42].ports, vec![8080, 9229]);
        apply_notification(&mut t, &notif(NotificationType::PortsChanged, Some(42), json!([]))).unwrap();
        assert!(t[&42].ports.is_empty());
    }

    #[test]
    fn child_lifecycle_and_ports() {
        let mut t = ProcessTable::new();
        apply_notification(&mut t, &started(42)).unwrap();
        apply_notification(
            &mut t,
            &notif(
                NotificationType::ChildProcessStarted,
                Some(42),
                json!({"pid": 50, "ppid": 42, "name": "node", "ports": []}),
            ),
        )
        .unwrap();
        apply_notification(&mut t, &notif(NotificationType::PortsChanged, Some(50), json!([8001]))).unwrap();
        assert_eq!(t[&42].children[&50].ports, vec![8001]);
        assert!(t[&42].ports.is_empty());

        apply_notification(&mut t, &notif(NotificationType::ChildProcessExited, Some(42), json!({"pid": 50}))).unwrap();
        assert!(t[&42].children.is_empty());
    }

    #[test]
    fn ports_for_unknown_pid() {
        let mut t = ProcessTable::new();
        assert_eq!(
            apply_notification(&mut t, &notif(NotificationType::PortsChanged, Some(7), json!([8000]))),
            Err(ApplyError::UnknownPid(7))
        );
    }

    #[test]
    fn missing_pid_is_reported() {
        let mut t = ProcessTable::new();
        assert_eq!(
            apply_notification(&mut t, &notif(NotificationType::ProcessExited, None, Value::Null)),
            Err(ApplyError::MissingField("pid"))
        );
    }

    #[test]
    fn malformed_data_is_reported() {
        let mut t = ProcessTable::new();
        assert!(matches!(
            apply_notification(&mut t, &notif(NotificationType::ProcessStarted, Some(1), json!("oops"))),
            Err(ApplyError::BadData(_))
        ));
    }

    #[test]
    fn open_file_request_is_a_noop() {
        let mut t = ProcessTable::new();
        apply_notification(&mut t, &notif(NotificationType::OpenFileRequest, Some(1), json!({"path": "a.py"}))).unwrap();
        assert!(t.is_empty());
    }
}
