use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{normalize_term, PaletteTables};
use super::resolver::ColorResolver;
use super::{ColorAssignment, Rgb};

const CLAUSE_BREAKS: &[char] = &['，', ',', '。', '.', '\n', ';', '；', '!', '！', '?', '？'];
const SENTENCE_BREAKS: &[char] = &['。', '.', '\n', '!', '！', '?', '？'];
const TUPLE_SEPARATORS: &[char] = &[':', '：', '='];
const TUPLE_TARGET_BREAKS: &[char] = &[',', '，', ';', '；', '{', '}'];
const OPEN_BRACKETS: &[char] = &['(', '[', '（', '［'];
const CLOSE_BRACKETS: &[char] = &[')', ']', '）', '］'];
const TRIPLE_COMMAS: &[char] = &[',', '，', '、'];
const NATURAL_CONNECTORS: &[&str] = &[
    "的", "是", "为", "采用", " is ", " are ", " in ", ":", "：",
];
const COLOR_MARKERS: &[&str] = &["色", " colour", " color"];
/// A marked color phrase may not run across one of these into the next assignment.
const COLOR_PHRASE_STOPS: &[&str] = &[" and ", " is ", " are ", "是", "和", "采用"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    StructuredData,
    TupleScan,
    NaturalLanguage,
    KeywordFallback,
}

impl ParseStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuredData => "structured_data",
            Self::TupleScan => "tuple_scan",
            Self::NaturalLanguage => "natural_language",
            Self::KeywordFallback => "keyword_fallback",
        }
    }
}

/// Something the parser skipped. Never fatal to the parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    InvalidChannelRange { target: String, values: [f64; 3] },
    UnknownColorName { target: String, value: String },
    UnsupportedValue { target: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub strategy: Option<ParseStrategy>,
    pub assignments: Vec<ColorAssignment>,
    pub issues: Vec<ParseIssue>,
}

impl ParseOutcome {
    /// An empty outcome is the parse-empty condition; callers may ask for a new reply.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StructuredColorValue {
    NumericTriple([f64; 3]),
    NamedColorRef(String),
    DetailedColorSpec(DetailedColorSpec),
}

#[derive(Debug, Default, Deserialize)]
struct DetailedColorSpec {
    #[serde(default, alias = "颜色", alias = "name")]
    color: Option<String>,
    #[serde(default, alias = "RGB")]
    rgb: Option<Vec<f64>>,
    #[serde(default, alias = "hex_color")]
    hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FurnitureColorItem {
    #[serde(default, alias = "target")]
    furniture: String,
    #[serde(flatten)]
    spec: DetailedColorSpec,
}

#[derive(Debug, Deserialize)]
struct FurnitureColorDocument {
    furniture_colors: Vec<Value>,
}

type StrategyFn = fn(&SpecParser, &str, &mut Vec<ParseIssue>) -> Vec<Candidate>;

#[derive(Debug)]
struct Candidate {
    target: String,
    name: Option<String>,
    rgb: Option<Rgb>,
}

/// Turns free-form reply text into color assignments.
///
/// Four strategies are tried in order and the first one yielding any assignment wins:
/// an embedded JSON object, `target: (r, g, b)` tuples, `target is <color>` phrases, and
/// finally plain co-occurrence of a target keyword and a color name in one sentence.
/// Missing RGB values are filled from the color table, missing names from the nearest
/// color. A target seen twice keeps its first assignment.
#[derive(Debug, Clone)]
pub struct SpecParser {
    tables: PaletteTables,
    resolver: ColorResolver,
}

impl SpecParser {
    pub fn new(tables: PaletteTables) -> Self {
        let resolver = ColorResolver::new(tables.colors.clone());
        Self { tables, resolver }
    }

    pub fn resolver(&self) -> &ColorResolver {
        &self.resolver
    }

    pub fn tables(&self) -> &PaletteTables {
        &self.tables
    }

    pub fn parse(&self, text: &str) -> ParseOutcome {
        let mut issues = Vec::new();
        let strategies: [(ParseStrategy, StrategyFn); 4] = [
            (ParseStrategy::StructuredData, Self::structured_candidates),
            (ParseStrategy::TupleScan, Self::tuple_candidates),
            (ParseStrategy::NaturalLanguage, Self::natural_candidates),
            (ParseStrategy::KeywordFallback, Self::fallback_candidates),
        ];

        for (strategy, run) in strategies {
            let assignments = self.finish(run(self, text, &mut issues));
            if !assignments.is_empty() {
                tracing::debug!(
                    strategy = strategy.as_str(),
                    assignments = assignments.len(),
                    issues = issues.len(),
                    "reply parsed"
                );
                return ParseOutcome {
                    strategy: Some(strategy),
                    assignments,
                    issues,
                };
            }
        }

        tracing::debug!(issues = issues.len(), "no color assignment found in reply");
        ParseOutcome {
            strategy: None,
            assignments: Vec::new(),
            issues,
        }
    }

    /// Explicit structured input: either `{"furniture_colors": [...]}` or a target→value map.
    pub fn parse_structured(&self, value: &Value) -> ParseOutcome {
        let mut issues = Vec::new();
        let assignments = self.finish(self.decode_structured(value, &mut issues));
        ParseOutcome {
            strategy: (!assignments.is_empty()).then_some(ParseStrategy::StructuredData),
            assignments,
            issues,
        }
    }

    fn finish(&self, candidates: Vec<Candidate>) -> Vec<ColorAssignment> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for candidate in candidates {
            let rgb = candidate.rgb.or_else(|| {
                candidate
                    .name
                    .as_deref()
                    .and_then(|name| self.resolver.name_to_rgb(name))
            });
            let name = match (candidate.name, rgb) {
                (Some(name), _) if !name.trim().is_empty() => name,
                (_, Some(rgb)) => self.resolver.rgb_to_name(rgb),
                _ => String::new(),
            };
            let Some(assignment) = ColorAssignment::new(candidate.target, name, rgb) else {
                continue;
            };
            if seen.insert(normalize_term(assignment.target())) {
                out.push(assignment);
            }
        }
        out
    }

    fn structured_candidates(&self, text: &str, issues: &mut Vec<ParseIssue>) -> Vec<Candidate> {
        for span in balanced_object_spans(text) {
            let Ok(value) = serde_json::from_str::<Value>(span) else {
                continue;
            };
            if value.is_object() {
                return self.decode_structured(&value, issues);
            }
        }
        Vec::new()
    }

    fn decode_structured(&self, value: &Value, issues: &mut Vec<ParseIssue>) -> Vec<Candidate> {
        if let Ok(document) = serde_json::from_value::<FurnitureColorDocument>(value.clone()) {
            return document
                .furniture_colors
                .into_iter()
                .filter_map(|item| serde_json::from_value::<FurnitureColorItem>(item).ok())
                .filter_map(|item| {
                    let target = clean_target(item.furniture.as_str());
                    self.decode_detailed(target, item.spec, issues)
                })
                .collect();
        }

        let Some(map) = value.as_object() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (key, raw) in map {
            let target = clean_target(key);
            if target.is_empty() {
                continue;
            }
            let decoded = match serde_json::from_value::<StructuredColorValue>(raw.clone()) {
                Ok(StructuredColorValue::NumericTriple(values)) => {
                    match Rgb::from_float_channels(values) {
                        Ok(rgb) => Some(Candidate {
                            target,
                            name: None,
                            rgb: Some(rgb),
                        }),
                        Err(_) => {
                            issues.push(ParseIssue::InvalidChannelRange { target, values });
                            None
                        }
                    }
                }
                Ok(StructuredColorValue::NamedColorRef(name)) => {
                    self.decode_named(target, name, issues)
                }
                Ok(StructuredColorValue::DetailedColorSpec(spec)) => {
                    self.decode_detailed(target, spec, issues)
                }
                Err(_) => {
                    issues.push(ParseIssue::UnsupportedValue { target });
                    None
                }
            };
            out.extend(decoded);
        }
        out
    }

    fn decode_named(
        &self,
        target: String,
        name: String,
        issues: &mut Vec<ParseIssue>,
    ) -> Option<Candidate> {
        if let Some(rgb) = Rgb::from_hex(name.as_str()) {
            return Some(Candidate {
                target,
                name: None,
                rgb: Some(rgb),
            });
        }
        match self.resolver.name_to_rgb(name.as_str()) {
            Some(rgb) => Some(Candidate {
                target,
                name: Some(name.trim().to_string()),
                rgb: Some(rgb),
            }),
            None => {
                issues.push(ParseIssue::UnknownColorName {
                    target,
                    value: name,
                });
                None
            }
        }
    }

    fn decode_detailed(
        &self,
        target: String,
        spec: DetailedColorSpec,
        issues: &mut Vec<ParseIssue>,
    ) -> Option<Candidate> {
        if target.is_empty() {
            return None;
        }
        let mut rgb = None;
        if let Some(values) = spec.rgb {
            match <[f64; 3]>::try_from(values.as_slice()) {
                Ok(values) => match Rgb::from_float_channels(values) {
                    Ok(value) => rgb = Some(value),
                    Err(_) => issues.push(ParseIssue::InvalidChannelRange {
                        target: target.clone(),
                        values,
                    }),
                },
                Err(_) => issues.push(ParseIssue::UnsupportedValue {
                    target: target.clone(),
                }),
            }
        }
        if rgb.is_none() {
            rgb = spec.hex.as_deref().and_then(Rgb::from_hex);
        }
        let name = spec
            .color
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if name.is_none() && rgb.is_none() {
            return None;
        }
        Some(Candidate { target, name, rgb })
    }

    fn tuple_candidates(&self, text: &str, issues: &mut Vec<ParseIssue>) -> Vec<Candidate> {
        let mut out = Vec::new();
        for line in text.lines() {
            let mut rest = line;
            while let Some(sep_idx) = rest.find(TUPLE_SEPARATORS) {
                let head = &rest[..sep_idx];
                let sep_len = rest[sep_idx..].chars().next().map_or(1, char::len_utf8);
                let tail = &rest[sep_idx + sep_len..];
                let target = clean_target(strip_trailing_note(&head[tuple_target_start(head)..]));

                match scan_triple(tail) {
                    Some((values, consumed)) => {
                        if !target.is_empty() {
                            match Rgb::from_float_channels(values) {
                                Ok(rgb) => out.push(Candidate {
                                    target,
                                    name: None,
                                    rgb: Some(rgb),
                                }),
                                Err(_) => {
                                    issues.push(ParseIssue::InvalidChannelRange { target, values })
                                }
                            }
                        }
                        rest = &tail[consumed..];
                    }
                    None => rest = tail,
                }
            }
        }
        out
    }

    /// Scans each clause left to right. Every connector preceded by a target keyword and
    /// followed by a known color yields an assignment, and scanning resumes after that color.
    fn natural_candidates(&self, text: &str, _issues: &mut Vec<ParseIssue>) -> Vec<Candidate> {
        let lowered = text.to_lowercase();
        let mut out = Vec::new();
        for clause in lowered.split(CLAUSE_BREAKS) {
            let mut splits = NATURAL_CONNECTORS
                .iter()
                .flat_map(|connector| {
                    clause
                        .match_indices(connector)
                        .map(move |(idx, _)| (idx, idx + connector.len()))
                })
                .collect::<Vec<_>>();
            splits.sort_unstable();

            let mut consumed = 0;
            for (start, end) in splits {
                if start < consumed {
                    continue;
                }
                let Some(target) = self
                    .tables
                    .targets
                    .find_in_text(&clause[consumed..start])
                    .last()
                    .map(|keyword| keyword.to_string())
                else {
                    continue;
                };
                let Some((name, rgb, len)) = self.leading_color(&clause[end..]) else {
                    continue;
                };
                out.push(Candidate {
                    target,
                    name: Some(name),
                    rgb: Some(rgb),
                });
                consumed = end + len;
            }
        }
        out
    }

    /// The known color opening `phrase`, with the number of bytes it spans. Falls back to a
    /// short phrase ending in 色/color that mentions a known name (`soft light gray color`).
    fn leading_color(&self, phrase: &str) -> Option<(String, Rgb, usize)> {
        let body = phrase
            .trim_start_matches(|ch: char| ch.is_whitespace() || ch.is_ascii_punctuation());
        let mut offset = phrase.len() - body.len();
        let mut body = body;
        for article in ["a ", "an ", "the "] {
            if let Some(stripped) = body.strip_prefix(article) {
                offset += article.len();
                body = stripped;
                break;
            }
        }

        let prefixed = self
            .tables
            .colors
            .entries()
            .iter()
            .filter_map(|entry| {
                let term = normalize_term(entry.name.as_str());
                let rest = body.strip_prefix(term.as_str())?;
                let on_boundary = !term.is_ascii()
                    || !rest.chars().next().is_some_and(|ch| ch.is_ascii_alphanumeric());
                (!term.is_empty() && on_boundary).then_some((entry, term.len()))
            })
            .max_by_key(|(_, len)| *len);
        if let Some((entry, len)) = prefixed {
            return Some((entry.name.clone(), entry.rgb, offset + len));
        }

        let marker_end = COLOR_MARKERS
            .iter()
            .filter_map(|marker| body.find(marker).map(|idx| idx + marker.len()))
            .min()?;
        let segment = &body[..marker_end];
        if COLOR_PHRASE_STOPS.iter().any(|stop| segment.contains(stop)) {
            return None;
        }
        let entry = self.tables.colors.find_in_text(segment)?;
        Some((entry.name.clone(), entry.rgb, offset + marker_end))
    }

    fn fallback_candidates(&self, text: &str, _issues: &mut Vec<ParseIssue>) -> Vec<Candidate> {
        let mut out = Vec::new();
        for sentence in text.split(SENTENCE_BREAKS) {
            let Some(color) = self.tables.colors.find_in_text(sentence) else {
                continue;
            };
            let without_color =
                normalize_term(sentence).replace(normalize_term(color.name.as_str()).as_str(), " | ");
            for target in self.tables.targets.find_in_text(without_color.as_str()) {
                out.push(Candidate {
                    target: target.to_string(),
                    name: Some(color.name.clone()),
                    rgb: Some(color.rgb),
                });
            }
        }
        out
    }
}

/// Strips list enumerators, bullets, emphasis markers and quotes around a target name.
fn clean_target(raw: &str) -> String {
    let mut value = raw.trim();
    loop {
        let before = value;
        value = value
            .trim_start_matches(['-', '*', '•', '·', '#', '>', '{', '[', '(', '（'])
            .trim_matches(['"', '\'', '`', '“', '”', '‘', '’', '*'])
            .trim();
        let digits = value
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit())
            .map_or(value.len(), |(idx, _)| idx);
        if digits > 0 {
            let after = &value[digits..];
            for marker in ['.', ')', '、', '）'] {
                if let Some(stripped) = after.strip_prefix(marker) {
                    value = stripped.trim();
                    break;
                }
            }
        }
        if value == before {
            break;
        }
    }
    value.to_string()
}

/// Start of the target inside the text before a tuple separator: just after the last
/// clause break or unmatched opening bracket, so `Bed (white, matte)` stays whole.
fn tuple_target_start(head: &str) -> usize {
    let mut depth = 0usize;
    for (idx, ch) in head.char_indices().rev() {
        if CLOSE_BRACKETS.contains(&ch) {
            depth += 1;
        } else if OPEN_BRACKETS.contains(&ch) {
            if depth == 0 {
                return idx + ch.len_utf8();
            }
            depth -= 1;
        } else if depth == 0 && TUPLE_TARGET_BREAKS.contains(&ch) {
            return idx + ch.len_utf8();
        }
    }
    0
}

/// Drops a trailing bracketed note from a target: `Bed (Nordic white)` becomes `Bed`.
/// A target that is nothing but the note keeps its inner text.
fn strip_trailing_note(target: &str) -> &str {
    let trimmed = target.trim_end();
    if !trimmed.ends_with(CLOSE_BRACKETS) {
        return trimmed;
    }
    let mut depth = 0usize;
    for (idx, ch) in trimmed.char_indices().rev() {
        if CLOSE_BRACKETS.contains(&ch) {
            depth += 1;
        } else if OPEN_BRACKETS.contains(&ch) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                let before = trimmed[..idx].trim_end();
                if !clean_target(before).is_empty() {
                    return before;
                }
                let inner_end = trimmed.len() - trimmed.chars().next_back().map_or(0, char::len_utf8);
                return &trimmed[idx + ch.len_utf8()..inner_end];
            }
        }
    }
    trimmed
}

/// Scans `[rgb] [(|[] r , g , b [)|]]` at the start of `input` (after optional whitespace).
/// Returns the channel values and the number of bytes consumed.
fn scan_triple(input: &str) -> Option<([f64; 3], usize)> {
    let mut cursor = Cursor::new(input);
    cursor.skip_whitespace();
    if cursor.eat_ignore_ascii_case("rgb") {
        cursor.skip_whitespace();
    }
    let opened = cursor.eat_any(&['(', '[', '（', '［']);
    cursor.skip_whitespace();

    let mut values = [0.0; 3];
    for (idx, slot) in values.iter_mut().enumerate() {
        if idx > 0 {
            cursor.skip_whitespace();
            if !cursor.eat_any(TRIPLE_COMMAS) {
                return None;
            }
            cursor.skip_whitespace();
        }
        *slot = cursor.number()?;
    }

    let after_number = cursor.position();
    let mut decimal = input[after_number..].chars();
    if decimal.next() == Some('.') && decimal.next().is_some_and(|ch| ch.is_ascii_digit()) {
        return None;
    }
    cursor.skip_whitespace();
    if opened && cursor.eat_any(&[')', ']', '）', '］']) {
        return Some((values, cursor.position()));
    }
    Some((values, after_number))
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn eat_any(&mut self, options: &[char]) -> bool {
        match self.peek() {
            Some(ch) if options.contains(&ch) => {
                self.pos += ch.len_utf8();
                true
            }
            _ => false,
        }
    }

    fn eat_ignore_ascii_case(&mut self, word: &str) -> bool {
        let rest = &self.input[self.pos..];
        match rest.get(..word.len()) {
            Some(head) if head.eq_ignore_ascii_case(word) => {
                self.pos += word.len();
                true
            }
            _ => false,
        }
    }

    fn number(&mut self) -> Option<f64> {
        let rest = &self.input[self.pos..];
        let len = rest
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit())
            .map_or(rest.len(), |(idx, _)| idx);
        if len == 0 {
            return None;
        }
        let value = rest[..len].parse::<f64>().ok()?;
        self.pos += len;
        Some(value)
    }
}

/// Every `{...}` span with balanced braces, outermost first, ignoring braces inside strings.
fn balanced_object_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{').filter_map(move |(start, _)| {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, ch) in text[start..].char_indices() {
            if in_string {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + 1]);
                    }
                }
                _ => {}
            }
        }
        None
    })
}
