use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Page context attached to an action at commit time.
///
/// Both fields are informational: replay never uses them to locate elements,
/// only to pick a starting URL when none is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(rename = "pageUrl", default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(rename = "pageTitle", default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

impl PageContext {
    pub fn is_empty(&self) -> bool {
        self.page_url.is_none() && self.page_title.is_none()
    }
}

/// One recorded user-equivalent event.
///
/// Serialises with a `type` tag and the stable field names of the action log
/// file format: `{"type":"fill","selector":"#q","value":"rust","timestamp":1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        selector: String,
        timestamp: u64,
        #[serde(flatten)]
        context: PageContext,
    },
    Fill {
        selector: String,
        value: String,
        timestamp: u64,
        #[serde(flatten)]
        context: PageContext,
    },
    Goto {
        url: String,
        timestamp: u64,
        #[serde(flatten)]
        context: PageContext,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Goto,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Click => write!(f, "click"),
            ActionKind::Fill => write!(f, "fill"),
            ActionKind::Goto => write!(f, "goto"),
        }
    }
}

impl Action {
    pub fn click(selector: impl Into<String>, timestamp: u64) -> Self {
        Action::Click {
            selector: selector.into(),
            timestamp,
            context: PageContext::default(),
        }
    }

    pub fn fill(selector: impl Into<String>, value: impl Into<String>, timestamp: u64) -> Self {
        Action::Fill {
            selector: selector.into(),
            value: value.into(),
            timestamp,
            context: PageContext::default(),
        }
    }

    pub fn goto(url: impl Into<String>, timestamp: u64) -> Self {
        Action::Goto {
            url: url.into(),
            timestamp,
            context: PageContext::default(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Fill { .. } => ActionKind::Fill,
            Action::Goto { .. } => ActionKind::Goto,
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            Action::Click { selector, .. } | Action::Fill { selector, .. } => Some(selector),
            Action::Goto { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Action::Fill { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Action::Goto { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Action::Click { timestamp, .. }
            | Action::Fill { timestamp, .. }
            | Action::Goto { timestamp, .. } => *timestamp,
        }
    }

    pub fn set_timestamp(&mut self, ts: u64) {
        match self {
            Action::Click { timestamp, .. }
            | Action::Fill { timestamp, .. }
            | Action::Goto { timestamp, .. } => *timestamp = ts,
        }
    }

    pub fn context(&self) -> &PageContext {
        match self {
            Action::Click { context, .. }
            | Action::Fill { context, .. }
            | Action::Goto { context, .. } => context,
        }
    }

    pub fn with_context(mut self, ctx: PageContext) -> Self {
        match &mut self {
            Action::Click { context, .. }
            | Action::Fill { context, .. }
            | Action::Goto { context, .. } => *context = ctx,
        }
        self
    }
}

/// Ordered sequence of actions: the replay script.
///
/// Serialises as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    actions: Vec<Action>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, keeping timestamps non-decreasing.
    ///
    /// A clock reading older than the last action is raised to the last
    /// action's timestamp; the stored value is returned.
    pub fn push(&mut self, mut action: Action) -> u64 {
        if let Some(last) = self.last_timestamp()
            && action.timestamp() < last
        {
            action.set_timestamp(last);
        }
        let ts = action.timestamp();
        self.actions.push(action);
        ts
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.actions.last().map(Action::timestamp)
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    /// Pretty-printed JSON array, the exported action log format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.actions)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<Vec<Action>> for Session {
    fn from(actions: Vec<Action>) -> Self {
        let mut session = Session::new();
        for action in actions {
            session.push(action);
        }
        session
    }
}

impl<'a> IntoIterator for &'a Session {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

/// Snapshot of a single element as seen by the page host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_body: bool,
    /// Tag names of the preceding element siblings, nearest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preceding: Vec<String>,
}

/// Chain of element snapshots from an event target up to the root body.
///
/// `levels[0]` is the target itself. The chain ends at the body element, or
/// earlier if the target was detached from the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementLineage {
    pub levels: Vec<ElementSnapshot>,
}

impl ElementLineage {
    pub fn new(levels: Vec<ElementSnapshot>) -> Self {
        Self { levels }
    }

    pub fn target(&self) -> Option<&ElementSnapshot> {
        self.levels.first()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTrigger {
    PushState,
    ReplaceState,
    PopState,
    Load,
    Poll,
}

/// Raw notification from the page host to the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Click {
        target: ElementLineage,
    },
    Input {
        target: ElementLineage,
        value: String,
    },
    Navigation {
        url: String,
        trigger: NavigationTrigger,
    },
    Mutation {
        #[serde(default)]
        added: usize,
        #[serde(default)]
        removed: usize,
    },
    Page {
        url: String,
        #[serde(default)]
        title: String,
    },
}

/// Host-to-recorder control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    Start,
    Stop,
    Clear,
    /// Commit debounced fills now instead of after their quiet period.
    Flush,
    Export,
    GetAll,
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlCommand::Start => "START",
            ControlCommand::Stop => "STOP",
            ControlCommand::Clear => "CLEAR",
            ControlCommand::Flush => "FLUSH",
            ControlCommand::Export => "EXPORT",
            ControlCommand::GetAll => "GET_ALL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown control command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "START" => Ok(ControlCommand::Start),
            "STOP" => Ok(ControlCommand::Stop),
            "CLEAR" => Ok(ControlCommand::Clear),
            "FLUSH" => Ok(ControlCommand::Flush),
            "EXPORT" => Ok(ControlCommand::Export),
            "GET_ALL" | "GETALL" => Ok(ControlCommand::GetAll),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Serialized action log, set by `EXPORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    /// Recorded actions, set by `GET_ALL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(active: bool) -> Self {
        Self {
            ok: true,
            active: Some(active),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Persisted recorder state, written to the storage collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderSnapshot {
    pub active: bool,
    pub session: Session,
}

/// Messages a connected page host (extension) sends to the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    Event {
        event: PageEvent,
    },
    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        cmd: ControlCommand,
    },
}

/// Messages the remote server sends back to a page host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        response: ControlResponse,
    },
    Error {
        message: String,
    },
}
