//! Prompt builders for every backend call the engine makes.
use std::fmt::Write as _;

use crate::personas::{Persona, Theme};
use crate::session::{ChatTurn, Outcome};

/// Everything a persona-facing prompt needs for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub persona: &'a Persona,
    pub theme: &'a Theme,
    pub history: &'a [ChatTurn],
    pub document_context: &'a str,
}

/// Render turns as `ROLE: text` lines.
#[must_use]
pub fn format_history(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let _ = writeln!(out, "{}: {}", turn.speaker.as_str().to_uppercase(), turn.text);
    }
    out
}

fn character_block(ctx: &TurnContext<'_>) -> String {
    format!(
        "CHARACTER DETAILS:\n\
         Role: {role}\n\
         Style: {style}\n\
         Win Condition: {win}\n\n\
         STARTUP THEME CONTEXT:\n\
         Theme: {theme}\n\
         Theme Description: {desc}\n\
         Mandatory Challenge Areas: {focus}\n",
        role = ctx.persona.role,
        style = ctx.persona.style,
        win = ctx.persona.win_condition,
        theme = ctx.theme.name,
        desc = ctx.theme.description,
        focus = ctx.theme.focus_areas.join(", "),
    )
}

fn document_block(document_context: &str) -> String {
    if document_context.trim().is_empty() {
        return String::new();
    }
    format!(
        "\nFOUNDER DOCUMENT CONTEXT:\n{document_context}\n\
         Cross-reference the founder's claims against these excerpts and challenge contradictions.\n"
    )
}

/// Conversational reply prompt; the model speaks in character, plain text only.
#[must_use]
pub fn reply_prompt(ctx: &TurnContext<'_>, user_text: &str) -> String {
    format!(
        "SYSTEM INSTRUCTION:\n\
         You are roleplaying an investor in a startup pitch meeting. Stay in character.\n\n\
         {character}{document}\n\
         RULES:\n\
         - Tailor your questions and skepticism to the theme and its challenge areas.\n\
         - Reply conversationally in two to five sentences.\n\
         - Output plain text only. No JSON, no scores, no stage directions about the game.\n\n\
         CURRENT CHAT HISTORY:\n{history}\n\
         USER'S NEW INPUT:\n{user_text}\n",
        character = character_block(ctx),
        document = document_block(ctx.document_context),
        history = format_history(ctx.history),
    )
}

/// Judgment-only prompt demanding strict JSON.
///
/// `ctx.history` is expected to already contain the investor's reply for
/// this turn.
#[must_use]
pub fn judgment_prompt(ctx: &TurnContext<'_>, user_text: &str) -> String {
    format!(
        "SYSTEM INSTRUCTION:\n\
         You are the referee of a startup pitch game. Judge the founder's latest answer \
         against the character's win condition. Do not write any dialogue.\n\n\
         {character}{document}\n\
         SCORING RULES:\n\
         - Bad, vague, or off-character answers take damage: -10 for minor mistakes, -20 for major failures.\n\
         - If the answer satisfies the win condition, set \"level_passed\" to true.\n\
         - If the conversation is ongoing but neutral, damage is 0 and level_passed is false.\n\n\
         TRANSCRIPT:\n{history}\n\
         FOUNDER'S LATEST ANSWER:\n{user_text}\n\n\
         OUTPUT FORMAT:\n\
         Respond in strict JSON only, with no markdown or text outside the object:\n\
         {{\"damage\": <0, -10, or -20>, \"level_passed\": <true or false>, \"feedback\": \"<one short sentence>\"}}\n",
        character = character_block(ctx),
        document = document_block(ctx.document_context),
        history = format_history(ctx.history),
    )
}

/// Non-streamed continuation request after a broken stream.
#[must_use]
pub fn recovery_prompt(original_prompt: &str, partial: &str) -> String {
    format!(
        "{original_prompt}\n\
         YOUR RESPONSE SO FAR (already shown to the user, verbatim):\n\
         <<<\n{partial}\n>>>\n\n\
         The connection dropped mid-response. Continue exactly where the text above stops. \
         Do not repeat any of it. If it already reads as complete, reply with a single closing sentence.\n"
    )
}

pub const REPORT_SCHEMA: &str = r#"{
  "scores": {
    "confidence": <integer 0-100>,
    "technical_clarity": <integer 0-100>,
    "business_viability": <integer 0-100>,
    "resilience_under_pressure": <integer 0-100>
  },
  "strengths": ["<string>", "<string>", "<string>"],
  "weaknesses": ["<string>", "<string>", "<string>"],
  "next_actions": ["<string>", "<string>", "<string>"],
  "summary": "<two or three sentences>"
}"#;

/// End-of-run coaching report prompt.
#[must_use]
pub fn post_mortem_prompt(
    transcript: &[ChatTurn],
    theme: &Theme,
    outcome: Outcome,
    document_context: &str,
) -> String {
    format!(
        "SYSTEM INSTRUCTION:\n\
         You are a seasoned startup coach reviewing a founder's pitch gauntlet run.\n\n\
         Theme: {theme}\n\
         Theme Description: {desc}\n\
         Challenge Areas: {focus}\n\
         Outcome: {outcome}\n\
         {document}\n\
         FULL TRANSCRIPT:\n{history}\n\
         Produce a candid post-mortem. Each list must contain exactly three short, specific items.\n\
         Respond in strict JSON only, matching this schema:\n{REPORT_SCHEMA}\n",
        theme = theme.name,
        desc = theme.description,
        focus = theme.focus_areas.join(", "),
        outcome = outcome.as_str(),
        document = document_block(document_context),
        history = format_history(transcript),
    )
}

/// Ask the model to fix an invalid report.
#[must_use]
pub fn repair_prompt(invalid_output: &str, complaint: &str) -> String {
    format!(
        "The following JSON does not satisfy the required schema.\n\
         Problem: {complaint}\n\n\
         INVALID OUTPUT:\n{invalid_output}\n\n\
         Return corrected JSON only, matching this schema exactly:\n{REPORT_SCHEMA}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::GameContent;
    use crate::session::Speaker;

    fn turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::new(Speaker::Ai, "What is a wee-fee?"),
            ChatTurn::new(Speaker::User, "It lets your phone talk to the internet."),
        ]
    }

    #[test]
    fn history_uses_upper_case_roles() {
        let text = format_history(&turns());
        assert!(text.starts_with("AI: What is a wee-fee?\nUSER: "));
    }

    #[test]
    fn judgment_prompt_demands_json_and_carries_persona() {
        let content = GameContent::bundled().unwrap();
        let history = turns();
        let ctx = TurnContext {
            persona: content.persona(1).unwrap(),
            theme: content.theme_or_default("MedTech"),
            history: &history,
            document_context: "",
        };
        let prompt = judgment_prompt(&ctx, "hello");
        assert!(prompt.contains("strict JSON"));
        assert!(prompt.contains("85-year-old grandmother"));
        assert!(prompt.contains("patient safety"));
        assert!(!prompt.contains("FOUNDER DOCUMENT CONTEXT"));

        let ctx = TurnContext {
            document_context: "Excerpt: 40% margins",
            ..ctx
        };
        assert!(reply_prompt(&ctx, "hello").contains("40% margins"));
    }

    #[test]
    fn recovery_prompt_embeds_partial_verbatim() {
        let prompt = recovery_prompt("ORIGINAL", "Tell me your");
        assert!(prompt.starts_with("ORIGINAL"));
        assert!(prompt.contains("<<<\nTell me your\n>>>"));
        assert!(prompt.contains("Do not repeat"));
    }

    #[test]
    fn repair_prompt_carries_complaint() {
        let prompt = repair_prompt("{}", "missing summary");
        assert!(prompt.contains("missing summary"));
        assert!(prompt.contains("resilience_under_pressure"));
    }
}
