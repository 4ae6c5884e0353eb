/*
 * fleet/api - defines the objects shared between the operator and the
 * monitoring agents it coordinates
 */

pub mod agent;
pub use agent::AgentRef;

pub mod coordination;
pub use coordination::CoordinationRecord;
pub use coordination::ResourceName;
pub use coordination::AGENT_PORT;
