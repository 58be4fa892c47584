//! Assembly error types.

/// Errors detected while validating the reaction graph before the first tick.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// An output was connected to an input of a different value type.
    #[error("cannot connect {output} ({output_type}) to {input} ({input_type})")]
    TypeMismatch {
        output: String,
        output_type: &'static str,
        input: String,
        input_type: &'static str,
    },

    /// An input already has a producer.
    #[error("input {input} is already connected to {existing}")]
    MultipleProducers { input: String, existing: String },

    /// A port handle does not have the expected direction.
    #[error("port {port} is not an {expected}")]
    WrongDirection { port: String, expected: &'static str },

    /// A reaction was declared without any trigger.
    #[error("reaction {reaction} has no triggers")]
    NoTriggers { reaction: String },

    /// The reaction graph contains a cycle at a single tag.
    #[error("causality loop through reactions: {}", reactions.join(" -> "))]
    CausalityLoop { reactions: Vec<String> },

    /// Two reactors were registered under the same name.
    #[error("duplicate reactor name: {name}")]
    DuplicateReactor { name: String },
}
