use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Production stage of a piece. The declaration order is the display order
/// used for grouping; it does not restrict which transitions are allowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idea,
    New,
    LeatherHard,
    BoneDry,
    BisqueFiring,
    GlazeFiring,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Idea,
        Stage::New,
        Stage::LeatherHard,
        Stage::BoneDry,
        Stage::BisqueFiring,
        Stage::GlazeFiring,
        Stage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idea => "idea",
            Stage::New => "new",
            Stage::LeatherHard => "leather_hard",
            Stage::BoneDry => "bone_dry",
            Stage::BisqueFiring => "bisque_firing",
            Stage::GlazeFiring => "glaze_firing",
            Stage::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Stages a piece can be worked at between idea and completion.
    pub fn is_bench(&self) -> bool {
        !matches!(self, Stage::Idea | Stage::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Idea => "Idea",
            Stage::New => "New",
            Stage::LeatherHard => "Leather Hard",
            Stage::BoneDry => "Bone Dry",
            Stage::BisqueFiring => "Bisque Firing",
            Stage::GlazeFiring => "Glaze Firing",
            Stage::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked unit of ceramic work. One record serves every stage;
/// `is_commission`, `priority` and `display_order` only carry meaning while
/// `stage == Stage::Idea` (see [`Piece::phase`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Piece {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stage: Stage,
    #[serde(default)]
    pub is_graveyard: bool,
    #[serde(default)]
    pub is_commission: bool,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub display_order: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Stage-gated view over a [`Piece`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiecePhase<'a> {
    Idea {
        piece: &'a Piece,
        is_commission: bool,
        priority: Option<i32>,
        display_order: i64,
    },
    Active {
        piece: &'a Piece,
        stage: Stage,
    },
    Completed {
        piece: &'a Piece,
        completed_at: Option<DateTime<Utc>>,
    },
}

impl Piece {
    pub fn phase(&self) -> PiecePhase<'_> {
        match self.stage {
            Stage::Idea => PiecePhase::Idea {
                piece: self,
                is_commission: self.is_commission,
                priority: self.priority,
                display_order: self.display_order,
            },
            Stage::Completed => PiecePhase::Completed {
                piece: self,
                completed_at: self.completed_at,
            },
            stage => PiecePhase::Active { piece: self, stage },
        }
    }
}

/// Input for creating a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPiece {
    pub title: String,
    pub description: Option<String>,
    pub stage: Stage,
    pub is_commission: bool,
    pub priority: Option<i32>,
}

impl NewPiece {
    pub fn idea(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            stage: Stage::Idea,
            is_commission: false,
            priority: None,
        }
    }

    /// A piece that starts on the bench at `stage` (normally `Stage::New`).
    pub fn active(title: impl Into<String>, stage: Stage) -> Self {
        Self {
            stage,
            ..Self::idea(title)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn commission(mut self, is_commission: bool) -> Self {
        self.is_commission = is_commission;
        self
    }

    pub fn priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }
}

/// An image attached to exactly one piece.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Photo {
    pub id: String,
    pub piece_id: String,
    pub url: String,
    #[serde(default)]
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}
