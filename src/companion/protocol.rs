use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line on the companion socket: a message plus the origin it claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub origin: String,
    pub message: InboundMessage,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, message: InboundMessage) -> Self {
        Self {
            origin: origin.into(),
            message,
        }
    }
}

/// Raw inbound message shaped as `{ "kind": ..., ...payload }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn generate(prompt: impl Into<String>) -> Self {
        Self::new(Command::GENERATE).with(GENERATION_PARAMS, prompt.into())
    }

    pub fn refresh_models() -> Self {
        Self::new(Command::REFRESH_MODELS)
    }
}

const GENERATION_PARAMS: &str = "generationParams";

/// Commands the host understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Inject the prompt and start generating right away
    Generate { prompt: String },
    /// Click the checkpoint refresh control
    RefreshModels,
    /// Anything else, kept so newer companions do not break older hosts
    Unrecognized { kind: String },
}

impl Command {
    pub const GENERATE: &'static str = "generate";
    pub const REFRESH_MODELS: &'static str = "refresh-models";

    pub fn from_message(message: &InboundMessage) -> Self {
        match message.kind.as_str() {
            Self::GENERATE => match message.payload.get(GENERATION_PARAMS).and_then(Value::as_str) {
                Some(prompt) => Command::Generate {
                    prompt: prompt.to_string(),
                },
                None => Command::Unrecognized {
                    kind: message.kind.clone(),
                },
            },
            Self::REFRESH_MODELS => Command::RefreshModels,
            other => Command::Unrecognized {
                kind: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Command::Generate { .. } => Self::GENERATE,
            Command::RefreshModels => Self::REFRESH_MODELS,
            Command::Unrecognized { kind } => kind,
        }
    }
}

/// Notices sent from the host back to the companion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OutboundMessage {
    GenerationStarted { generate: bool },
    ModelsRefreshed,
    CommandFailed { command: String, error: String },
}

impl OutboundMessage {
    pub fn generation_started() -> Self {
        OutboundMessage::GenerationStarted { generate: true }
    }
}
