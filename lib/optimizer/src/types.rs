use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named values of an example or of a program response.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Position of an example in the trainset
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExampleId(pub usize);

impl fmt::Display for ExampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "example#{}", self.0)
    }
}

/// Input/expected-output pair supplied by the caller.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct TrainingExample {
    pub inputs: Fields,
    pub expected: Fields,
}

impl TrainingExample {
    pub fn new(inputs: Fields, expected: Fields) -> Self {
        Self { inputs, expected }
    }
}

/// Identity of a program variant inside one optimization run.
///
/// The baseline program always has [`ProgramId::BASELINE`].
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(pub u64);

impl ProgramId {
    pub const BASELINE: ProgramId = ProgramId(0);

    pub fn is_baseline(self) -> bool {
        self == Self::BASELINE
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

/// Few-shot demonstration attached to a program
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Demo {
    pub inputs: Fields,
    pub outputs: Fields,
    /// Score of the trajectory this demonstration was taken from
    pub score: f64,
}

/// Instructions, demonstrations and hyperparameters used to drive the language model.
///
/// Programs are shared as `Arc<Program>` once inserted into the pool and never change afterwards.
/// Strategies build new variants with [`Program::derive`].
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct Program {
    id: Option<ProgramId>,
    parent: Option<ProgramId>,
    pub instructions: String,
    #[serde(default)]
    pub demos: Vec<Demo>,
    /// Free-form hyperparameters forwarded to the executor
    #[serde(default)]
    pub params: Fields,
}

impl Program {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    /// Identity assigned by the pool. `None` until the program is inserted.
    pub fn id(&self) -> Option<ProgramId> {
        self.id
    }

    /// Program this variant was derived from
    pub fn parent(&self) -> Option<ProgramId> {
        self.parent
    }

    /// Copy of this program without identity, remembering where it came from.
    pub fn derive(&self) -> Program {
        Program {
            id: None,
            parent: self.id,
            instructions: self.instructions.clone(),
            demos: self.demos.clone(),
            params: self.params.clone(),
        }
    }

    pub(crate) fn with_id(mut self, id: ProgramId) -> Self {
        self.id = Some(id);
        self
    }

    /// Same instructions, demonstrations and parameters, regardless of identity.
    pub fn same_content(&self, other: &Program) -> bool {
        self.instructions == other.instructions
            && self.demos == other.demos
            && self.params == other.params
    }

    /// Whether a demonstration with the same inputs is already attached.
    pub fn has_demo_for(&self, inputs: &Fields) -> bool {
        self.demos.iter().any(|demo| &demo.inputs == inputs)
    }
}
