//! Turn orchestration: the pure state machine in `transitions`, the engine
//! that performs its local effects, and the hub that serializes turns per thread.

pub mod approval;
pub mod conversation_context;
pub mod dispatcher;
pub mod effect;
pub mod engine;
pub mod error;
pub mod event;
pub mod hub;
pub mod prompt_render;
pub mod state;
pub mod summary;
pub mod transitions;

pub use approval::{execute_approved, execution_notice, rejection_notice};
pub use effect::{ApprovalRequest, Effect, ForwardRequest, LocalEffect};
pub use engine::{RandomCallIds, TurnEngine, TurnOutcome};
pub use error::OrchestratorError;
pub use event::TurnEvent;
pub use hub::{
    CheckpointError, CheckpointStore, ConversationHub, FileCheckpointStore,
    InMemoryCheckpointStore,
};
pub use state::{ConversationState, NextAction};
pub use transitions::{transition, CallIdSource, Step, TransitionContext, MAX_MODEL_ROUNDS};
