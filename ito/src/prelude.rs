//! Convenient re-exports of the types most programs need.

pub use crate::agent::{
    Agent, AgentExecution, AgentStep, ExecutionStatus, ReasoningTrace, RunContext,
};
pub use crate::error::{
    Error, GenerateError, MemoryError, PlanError, Result, StrategyError, ToolError,
};
pub use crate::event::{EventKind, EventSink, StreamEvent, UiPartEmitter};
pub use crate::generate::{
    ContentPart, Generator, GeneratorConfig, ObjectOptions, ObjectResult, StreamRequest,
    StreamResponse, StreamRun, TextRequest, TextResult, ThinkingOptions,
};
pub use crate::guardrail::{Guardrails, Violation};
pub use crate::memory::{
    EmbeddingModel, InMemoryVectorStore, MemoryEntry, MemoryManager, MemoryTier, VectorStore,
};
pub use crate::message::{ChatMessage, Role, ToolCall};
pub use crate::plan::{
    CachingPlanStore, InMemoryPlanStore, Plan, PlanStatus, PlanStep, PlanStore, StepStatus,
};
pub use crate::provider::{
    ChatProvider, ChatProviderExt, ChatRequest, ChatResponse, ProviderFrame, SharedChatProvider,
    StopReason, ToolChoice,
};
pub use crate::reflection::{ReflectionEngine, ReflectionQuality, ReflectionResult};
pub use crate::replan::{FailurePattern, ReplanEngine};
pub use crate::state::{AgentState, InMemoryStateStore, StateStore};
pub use crate::strategy::{PlanExecuteStrategy, ReactStrategy, Strategy};
pub use crate::tool::{Tool, ToolContext, ToolDefinition, ToolExecutionResult, ToolRegistry};
pub use crate::usage::Usage;
pub use crate::verifier::{PlanVerifier, VerificationResult};
