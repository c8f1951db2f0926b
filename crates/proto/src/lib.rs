//! Generated wire types for the node <-> conductor stream, plus conversions
//! to/from `symphony-core`'s data model.
//!
//! The generated module is intentionally kept separate from the hand-written
//! conversions below: regenerating `symphony.proto` should never require
//! touching this file.

pub mod generated {
    #![allow(clippy::all)]
    include!("generated/symphony.v1.rs");
}

pub mod log_hub;
pub mod session;

pub use generated::{
    node_conductor_client, node_conductor_server, CapacityEntry, ConductorToNode,
    DeploymentCancel, DeploymentCommandKind, DeploymentCurrentState, DeploymentReq,
    DeploymentStatus, DeploymentStatusList, GpuInfo, Heartbeat, LogBatch, LogLine, LogStream,
    LogSubscribe, LogUnsubscribe, NodeHello, NodeToConductor, Pong, ResourceSnapshot,
    StorageMount,
};

use symphony_core::model::{self, CapacityVector, CurrentState};

/// Convert a `CapacityVector` to its wire representation.
pub fn encode_capacity(vector: &CapacityVector) -> Vec<CapacityEntry> {
    vector
        .iter()
        .map(|(label, amount)| CapacityEntry {
            label: label.to_string(),
            amount,
        })
        .collect()
}

/// Reconstruct a `CapacityVector` from its wire representation.
pub fn decode_capacity(entries: &[CapacityEntry]) -> CapacityVector {
    CapacityVector::from_pairs(entries.iter().map(|e| (e.label.clone(), e.amount)))
}

/// Convert a core resource snapshot to its wire representation.
pub fn encode_resources(snapshot: &model::ResourceSnapshot) -> ResourceSnapshot {
    ResourceSnapshot {
        cpu_percent: snapshot.cpu_percent,
        per_core_percent: snapshot.per_core_percent.clone(),
        memory_used_bytes: snapshot.memory_used_bytes,
        memory_total_bytes: snapshot.memory_total_bytes,
        gpus: snapshot
            .gpus
            .iter()
            .map(|g| GpuInfo {
                index: g.index,
                name: g.name.clone(),
                memory_used_bytes: g.memory_used_bytes,
                memory_total_bytes: g.memory_total_bytes,
            })
            .collect(),
        storage_mounts: snapshot
            .storage_mounts
            .iter()
            .map(|m| StorageMount {
                path: m.path.clone(),
                used_bytes: m.used_bytes,
                total_bytes: m.total_bytes,
            })
            .collect(),
    }
}

/// Reconstruct a core resource snapshot from its wire representation.
pub fn decode_resources(wire: &ResourceSnapshot) -> model::ResourceSnapshot {
    model::ResourceSnapshot {
        cpu_percent: wire.cpu_percent,
        per_core_percent: wire.per_core_percent.clone(),
        memory_used_bytes: wire.memory_used_bytes,
        memory_total_bytes: wire.memory_total_bytes,
        gpus: wire
            .gpus
            .iter()
            .map(|g| model::GpuInfo {
                index: g.index,
                name: g.name.clone(),
                memory_used_bytes: g.memory_used_bytes,
                memory_total_bytes: g.memory_total_bytes,
            })
            .collect(),
        storage_mounts: wire
            .storage_mounts
            .iter()
            .map(|m| model::StorageMount {
                path: m.path.clone(),
                used_bytes: m.used_bytes,
                total_bytes: m.total_bytes,
            })
            .collect(),
    }
}

/// Convert a core lifecycle state to its wire enum value.
pub fn encode_current_state(state: CurrentState) -> DeploymentCurrentState {
    match state {
        CurrentState::Pending => DeploymentCurrentState::Pending,
        CurrentState::Starting => DeploymentCurrentState::Starting,
        CurrentState::Running => DeploymentCurrentState::Running,
        CurrentState::Stopping => DeploymentCurrentState::Stopping,
        CurrentState::Stopped => DeploymentCurrentState::Stopped,
        CurrentState::Failed => DeploymentCurrentState::Failed,
        CurrentState::Unknown => DeploymentCurrentState::Unknown,
    }
}

/// Reconstruct a core lifecycle state from its wire enum value. Unspecified
/// decodes to `Unknown` rather than panicking — a forward-compatible node
/// sending an enum value this conductor doesn't recognize should degrade
/// gracefully, not terminate the session.
pub fn decode_current_state(wire: DeploymentCurrentState) -> CurrentState {
    match wire {
        DeploymentCurrentState::Pending => CurrentState::Pending,
        DeploymentCurrentState::Starting => CurrentState::Starting,
        DeploymentCurrentState::Running => CurrentState::Running,
        DeploymentCurrentState::Stopping => CurrentState::Stopping,
        DeploymentCurrentState::Stopped => CurrentState::Stopped,
        DeploymentCurrentState::Failed => CurrentState::Failed,
        DeploymentCurrentState::Unknown | DeploymentCurrentState::Unspecified => {
            CurrentState::Unknown
        }
    }
}

/// Convert a core log stream tag to its wire enum value.
pub fn encode_log_stream(stream: model::LogStream) -> LogStream {
    match stream {
        model::LogStream::Stdout => LogStream::Stdout,
        model::LogStream::Stderr => LogStream::Stderr,
        model::LogStream::System => LogStream::System,
        model::LogStream::SystemHealthCheck => LogStream::SystemHealthCheck,
    }
}

/// Reconstruct a core log stream tag from its wire enum value.
pub fn decode_log_stream(wire: LogStream) -> model::LogStream {
    match wire {
        LogStream::Stdout => model::LogStream::Stdout,
        LogStream::Stderr => model::LogStream::Stderr,
        LogStream::System => model::LogStream::System,
        LogStream::SystemHealthCheck => model::LogStream::SystemHealthCheck,
        LogStream::Unspecified => model::LogStream::System,
    }
}

/// Convert a core log entry to its wire representation.
pub fn encode_log_entry(entry: &model::LogEntry) -> LogLine {
    LogLine {
        timestamp_unix_ms: entry.timestamp_unix_ms,
        stream: encode_log_stream(entry.stream) as i32,
        line: entry.line.clone(),
    }
}

/// Reconstruct a core log entry from its wire representation.
pub fn decode_log_entry(wire: &LogLine) -> model::LogEntry {
    model::LogEntry {
        timestamp_unix_ms: wire.timestamp_unix_ms,
        stream: decode_log_stream(LogStream::try_from(wire.stream).unwrap_or(LogStream::System)),
        line: wire.line.clone(),
    }
}
