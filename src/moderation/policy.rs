//! Escalation policy engine.
//!
//! Pure verdict resolution: no I/O, no clock, no platform calls. The
//! classifier only ever suggests; what gets enforced is decided here, by
//! applying the per-category overrides and floors to the suggestion.

use tracing::debug;

use crate::moderation::action::ModAction;
use crate::moderation::classifier::Verdict;
use crate::moderation::infractions::InfractionRecord;

/// Categories that mandate an immediate ban regardless of the suggestion.
const FORCE_BAN_CATEGORIES: [&str; 2] = ["5", "5A"];
/// Category floored at message removal when the suggestion is weaker.
const DELETE_FLOOR_CATEGORY: &str = "4";
/// Category marking self-harm concern rather than a punishable violation.
const SELF_HARM_CATEGORY: &str = "Suicidal Content";

/// The action a verdict resolved to, with the verdict fields carried along
/// for enforcement and audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementDecision {
    pub action: ModAction,
    /// Rule identifier, carried from the verdict unmodified.
    pub category: String,
    /// Classifier reasoning, carried from the verdict unmodified.
    pub reasoning: String,
    /// The case needs human review: the classifier flagged a violation but
    /// its suggestion could not be honored as given.
    pub review_flag: bool,
}

/// Resolves a verdict into the action to enforce.
///
/// Category rules bind before the suggestion: the self-harm category maps
/// to the support path, the forced-ban categories yield a ban whatever was
/// suggested, and the per-category floor raises weak suggestions. Only
/// then is the suggestion accepted as-is, so a bare `SUICIDAL` suggestion
/// takes the support path in the remaining categories. `history` is
/// advisory context only; the counting ladder lives in the classifier's
/// instructions, not here.
#[must_use]
pub fn decide(verdict: &Verdict, history: &[InfractionRecord]) -> EnforcementDecision {
    debug!(
        violation = verdict.violation,
        category = %verdict.category,
        suggested = %verdict.suggested_action,
        prior_infractions = history.len(),
        "resolving verdict"
    );

    if !verdict.violation {
        return EnforcementDecision {
            action: ModAction::Ignore,
            category: verdict.category.clone(),
            reasoning: verdict.reasoning.clone(),
            review_flag: false,
        };
    }

    let (suggested, unusable) = resolve_suggestion(&verdict.suggested_action);

    let action = if is_category(verdict, SELF_HARM_CATEGORY) {
        ModAction::Suicidal
    } else if FORCE_BAN_CATEGORIES
        .iter()
        .any(|category| is_category(verdict, category))
    {
        ModAction::Ban
    } else if is_category(verdict, DELETE_FLOOR_CATEGORY)
        && suggested.severity() < ModAction::Delete.severity()
    {
        ModAction::Delete
    } else {
        suggested
    };

    // A flagged violation that resolves to no action still needs human eyes.
    let review_flag = unusable || action == ModAction::Ignore;

    EnforcementDecision {
        action,
        category: verdict.category.clone(),
        reasoning: verdict.reasoning.clone(),
        review_flag,
    }
}

fn is_category(verdict: &Verdict, category: &str) -> bool {
    verdict.category.trim().eq_ignore_ascii_case(category)
}

/// Maps the raw suggestion to an action. Unrecognized `TIMEOUT*` values
/// degrade to surfacing the case; anything else unrecognized resolves to no
/// action and marks the suggestion unusable.
fn resolve_suggestion(raw: &str) -> (ModAction, bool) {
    if let Some(action) = ModAction::from_wire(raw) {
        return (action, false);
    }
    if raw.trim().to_ascii_uppercase().starts_with("TIMEOUT") {
        (ModAction::NotifyMods, false)
    } else {
        (ModAction::Ignore, true)
    }
}
