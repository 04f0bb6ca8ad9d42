use thumbforge_contracts::request::GenerationRequest;
use thumbforge_contracts::tables::{EngineTables, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRichness {
    /// Lens, lighting and grade clauses plus placement guidance.
    Cinematic,
    /// Brief, niche and expression only.
    Plain,
}

pub struct PromptBuilder<'a> {
    tables: &'a EngineTables,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(tables: &'a EngineTables) -> Self {
        Self { tables }
    }

    pub fn build(&self, request: &GenerationRequest, richness: PromptRichness) -> String {
        let brief = request.brief.trim().trim_end_matches('.');
        let niche = self.tables.niche(request.niche.as_deref());
        let expression = request
            .expression
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if richness == PromptRichness::Plain {
            let mut parts = vec![brief.to_string()];
            if let Some(niche) = request.niche.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                parts.push(format!("{niche} video thumbnail"));
            }
            if let Some(expression) = expression {
                parts.push(format!("{expression} expression"));
            }
            return parts.join(", ");
        }

        let style = self.tables.style(request.creator_style.as_deref());
        let mut sentences = vec![format!("{brief}.")];
        let mut keywords: Vec<&str> = Vec::new();
        if let Some(niche) = niche {
            keywords.extend(niche.keywords.iter().map(String::as_str));
        }
        keywords.extend(style.prompt_keywords.iter().map(String::as_str));
        if !keywords.is_empty() {
            sentences.push(format!("{}.", capitalize(&keywords.join(", "))));
        }
        if let Some(expression) = expression {
            sentences.push(format!("Subject shows a {expression} expression."));
        }
        if request.has_face() {
            sentences.push("Keep the reference person's identity.".to_string());
        }

        let text_side = request
            .placement
            .text_zone
            .as_deref()
            .and_then(side_of_zone)
            .or_else(|| style.text_sides.first().copied())
            .or_else(|| niche.and_then(|niche| niche.text_sides.first().copied()));
        let subject = request
            .placement
            .subject_position
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| text_side.map(|side| opposite(side).to_string()));
        if let Some(subject) = subject {
            sentences.push(format!("Subject placed {subject} of frame."));
        }
        if request.overlay_text().is_some() {
            let side = text_side.map(side_name).unwrap_or("top");
            sentences.push(format!(
                "Leave clean, uncluttered negative space on the {side} for headline text."
            ));
        }

        sentences.push(format!(
            "{} color grade, {}.",
            capitalize(&style.color_grade),
            style.lighting
        ));
        sentences.push(
            "Shot on a 35mm lens, shallow depth of field, crisp focus on the subject, 16:9 composition."
                .to_string(),
        );
        sentences.join(" ")
    }
}

fn side_of_zone(zone: &str) -> Option<Side> {
    let zone = zone.trim().to_ascii_lowercase();
    if zone.starts_with("top") {
        Some(Side::Top)
    } else if zone.starts_with("bottom") || zone.starts_with("lower") {
        Some(Side::Bottom)
    } else if zone.ends_with("left") {
        Some(Side::Left)
    } else if zone.ends_with("right") {
        Some(Side::Right)
    } else {
        None
    }
}

fn side_name(side: Side) -> &'static str {
    match side {
        Side::Top => "top",
        Side::Bottom => "bottom",
        Side::Left => "left",
        Side::Right => "right",
    }
}

fn opposite(side: Side) -> &'static str {
    match side {
        Side::Top => "in the lower half",
        Side::Bottom => "in the upper half",
        Side::Left => "on the right",
        Side::Right => "on the left",
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
