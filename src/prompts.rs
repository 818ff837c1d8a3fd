//! Prompt vocabulary for interior restyling.
//!
//! Maps a design style and room type onto a natural-language prompt. Unknown
//! values never error: styles fall back to `modern`, rooms to a generic "room".

pub const ROOM_PROMPT: &str = include_str!("../data/prompts/room_prompt.txt");
pub const NEGATIVE_PROMPT: &str = include_str!("../data/prompts/negative_prompt.txt");

pub const DEFAULT_STYLE: &str = "modern";
const FALLBACK_ROOM: &str = "room";

const STYLE_PROMPTS: &[(&str, &str)] = &[
    (
        "modern",
        "modern contemporary style, clean lines, neutral colors, minimalist furniture",
    ),
    (
        "minimalist",
        "minimalist style, white walls, simple furniture, zen aesthetic, uncluttered",
    ),
    (
        "scandinavian",
        "scandinavian style, light wood, cozy textiles, hygge atmosphere, natural light",
    ),
    (
        "industrial",
        "industrial style, exposed brick, metal accents, Edison bulbs, raw materials",
    ),
    (
        "bohemian",
        "bohemian style, colorful textiles, plants, eclectic decor, layered patterns",
    ),
    (
        "mid-century",
        "mid-century modern style, retro furniture, warm wood tones, vintage accents",
    ),
    (
        "japanese",
        "japanese style, zen minimalism, natural materials, tatami, shoji screens",
    ),
    (
        "luxury",
        "luxury style, elegant furniture, marble accents, gold details, crystal chandeliers",
    ),
];

const ROOM_PROMPTS: &[(&str, &str)] = &[
    ("living-room", "living room"),
    ("bedroom", "bedroom"),
    ("kitchen", "kitchen"),
    ("bathroom", "bathroom"),
    ("office", "home office"),
    ("outdoor", "outdoor patio"),
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

pub fn is_known_style(style: &str) -> bool {
    lookup(STYLE_PROMPTS, style).is_some()
}

pub fn is_known_room(room_type: &str) -> bool {
    lookup(ROOM_PROMPTS, room_type).is_some()
}

/// Build the generation prompt for a style/room pair.
pub fn build_prompt(style: &str, room_type: &str) -> String {
    let style_prompt = lookup(STYLE_PROMPTS, style)
        .or_else(|| lookup(STYLE_PROMPTS, DEFAULT_STYLE))
        .unwrap_or_default();
    let room_prompt = lookup(ROOM_PROMPTS, room_type).unwrap_or(FALLBACK_ROOM);

    render(
        ROOM_PROMPT.trim(),
        &[("style", style_prompt), ("room", room_prompt)],
    )
}

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}
