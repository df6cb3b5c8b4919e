//! Director interventions.
//!
//! A Director picks a weight in `0.0..=1.0` and some text. The weight maps to
//! one of three tiers with fixed breakpoints:
//!
//! | weight        | tier      |
//! |---------------|-----------|
//! | `[0.0, 0.3)`  | Subtle    |
//! | `[0.3, 0.8)`  | Mandatory |
//! | `[0.8, 1.0]`  | Override  |
//!
//! The 0.7–0.8 band is Mandatory.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, ParamOverride};
use crate::{Error, Result};

/// Lower bound (inclusive) of the Mandatory tier.
pub const MANDATORY_FROM: f32 = 0.3;

/// Lower bound (inclusive) of the Override tier.
pub const OVERRIDE_FROM: f32 = 0.8;

/// Influence tier of an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Side note the next agent may take into account.
    Subtle,
    /// Point the next agent must address.
    Mandatory,
    /// Standing directive for all later turns; forces a re-turn.
    Override,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Subtle => write!(f, "subtle"),
            Tier::Mandatory => write!(f, "mandatory"),
            Tier::Override => write!(f, "override"),
        }
    }
}

/// Map a weight to its tier.
///
/// # Errors
///
/// Returns `InvalidIntervention` for NaN or anything outside `0.0..=1.0`.
pub fn classify(weight: f32) -> Result<Tier> {
    if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
        return Err(Error::InvalidIntervention(format!(
            "weight {} outside 0.0..=1.0",
            weight
        )));
    }
    Ok(if weight < MANDATORY_FROM {
        Tier::Subtle
    } else if weight < OVERRIDE_FROM {
        Tier::Mandatory
    } else {
        Tier::Override
    })
}

/// When the intervention takes effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    /// Folded into the context of the next scheduled turn.
    BeforeNextTurn,
    /// Re-query an agent immediately. `None` means whoever is currently
    /// scheduled (or in flight).
    ForceReturn { agent: Option<AgentId> },
}

/// A classified Director instruction, consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionEvent {
    pub weight: f32,
    pub tier: Tier,
    pub text: String,
    pub timing: Timing,
    pub params: Option<ParamOverride>,
}

impl InterventionEvent {
    /// Classify `weight` and build an event with the tier's default timing.
    pub fn new(weight: f32, text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InvalidIntervention(
                "intervention text is empty".to_string(),
            ));
        }
        let tier = classify(weight)?;
        let timing = match tier {
            Tier::Override => Timing::ForceReturn { agent: None },
            Tier::Subtle | Tier::Mandatory => Timing::BeforeNextTurn,
        };
        Ok(Self {
            weight,
            tier,
            text: text.trim().to_string(),
            timing,
            params: None,
        })
    }

    /// Direct the forced re-turn at a specific agent. Override tier only.
    pub fn targeting(mut self, agent: AgentId) -> Result<Self> {
        if self.tier != Tier::Override {
            return Err(Error::InvalidIntervention(format!(
                "{} interventions cannot force a re-turn",
                self.tier
            )));
        }
        self.timing = Timing::ForceReturn { agent: Some(agent) };
        Ok(self)
    }

    /// Attach a generation-parameter change. Override tier only.
    pub fn with_params(mut self, params: ParamOverride) -> Result<Self> {
        if self.tier != Tier::Override {
            return Err(Error::InvalidIntervention(format!(
                "{} interventions cannot change generation parameters",
                self.tier
            )));
        }
        if params.is_empty() {
            return Err(Error::InvalidIntervention(
                "parameter override changes nothing".to_string(),
            ));
        }
        self.params = Some(params);
        Ok(self)
    }
}

/// Wrap Director text according to its tier.
pub fn render(tier: Tier, weight: f32, text: &str) -> String {
    match tier {
        Tier::Subtle => format!(
            "[Contextual Note]: A user observer has remarked: '{}'. \
             You may choose to incorporate this perspective if relevant.",
            text
        ),
        Tier::Mandatory => format!(
            "[MANDATORY INSTRUCTION]: The debate moderator requires you to address this point: '{}'. \
             Integrate this into your next response.",
            text
        ),
        Tier::Override => format!(
            "*** SYSTEM OVERRIDE (Priority {:.2}) ***\n\
             CRITICAL DIRECTIVE: Disregard previous flow if necessary. \
             You MUST focus entirely on this instruction: '{}'.",
            weight, text
        ),
    }
}
