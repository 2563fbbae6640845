//! Citation extraction and normalization for Brazilian statutory text.
//!
//! A cascade of pattern matchers runs from most-specific to least-specific
//! over the input; every accepted match claims its byte span, and weaker
//! matchers whose candidates overlap an already-claimed span are discarded.
//! That single shared claiming structure is what guarantees the no-overlap
//! invariant and makes the specificity ordering auditable: a bare law
//! reference embedded inside a full article citation is never double-counted.
//!
//! Extraction is pure and deterministic. It never fails: malformed input
//! degrades to fewer citations plus recorded parse errors, because the same
//! parser runs over gold reference text at preprocessing time and over
//! model-generated text at evaluation time.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Two-digit years at or above this value expand to 19xx; below, to 20xx.
pub const YEAR_CUTOFF: u32 = 50;

/// Byte-offset range `[start, end)` into the originating text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Kind of legal authority a citation points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationType {
    Article,
    Law,
    #[serde(rename = "súmula")]
    Sumula,
    CodeReference,
}

impl std::fmt::Display for CitationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Article => write!(f, "article"),
            Self::Law => write!(f, "law"),
            Self::Sumula => write!(f, "súmula"),
            Self::CodeReference => write!(f, "code_reference"),
        }
    }
}

/// One normalized citation extracted from free text.
///
/// Ordinal markers are preserved verbatim ("§ 1º" is not the same citation
/// as "§ 1"), and `raw_text` always carries the exact matched slice so a
/// citation with no recognizable structure still degrades gracefully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub citation_type: CitationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inciso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alinea: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_or_law_id: Option<String>,
    pub raw_text: String,
    pub source_span: Span,
}

/// Result of running the matcher cascade over one text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Citations ordered left-to-right by span start, pairwise non-overlapping.
    pub citations: Vec<Citation>,
    /// Non-fatal normalization problems (e.g. an unparseable year fragment).
    pub parse_errors: Vec<String>,
}

// ── Matcher patterns ─────────────────────────────────────────────────────────
//
// Priority order (distinct by construction, so equal-specificity overlap
// cannot arise): ArticleFull > Sumula > Law > ArticleBare > CodeBare.

/// Code names and abbreviations. Phrases are case-insensitive; bare
/// abbreviations are case-sensitive so "cf." (confer) is not a constitution.
const CODE_PAT: &str = r"(?i:constitui[çc][ãa]o\s+federal(?:\s+de\s+1988)?|c[óo]digo\s+de\s+processo\s+civil|c[óo]digo\s+de\s+processo\s+penal|c[óo]digo\s+de\s+defesa\s+do\s+consumidor|c[óo]digo\s+tribut[áa]rio\s+nacional|c[óo]digo\s+civil|c[óo]digo\s+penal|consolida[çc][ãa]o\s+das\s+leis\s+do\s+trabalho)|CRFB(?:/88)?|CF(?:/88)?|CPC|CPP|CDC|CTN|CLT|CC|CP";

/// Statute reference: kind + number + optional "/year" fragment.
const LAW_PAT: &str = r"(?i:(?P<kind>lei\s+complementar|decreto-lei|lei|medida\s+provis[óo]ria))\s*(?:[nN][º°]?\.?\s*)?(?P<num>\d{1,4}(?:\.\d{3})*)(?:\s*/\s*(?P<ano>\d{1,6}))?";

/// Article head plus optional §/inciso/alínea qualifiers.
const ART_PAT: &str = r#"[Aa]rt(?:igo)?s?\.?\s*(?P<art>\d{1,4}(?:\.\d{3})*(?:\s*[º°])?)(?P<quals>(?:\s*,?\s*(?i:§§?\s*\d{1,3}\s*[º°]?|par[áa]grafo\s+[úu]nico|inciso\s+[ivxlcdm]+|inc\.\s*[ivxlcdm]+|al[íi]nea\s+[“”"']?[a-z][“”"']?))*)"#;

static ARTICLE_FULL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b{ART_PAT}\s*,?\s*[dD][aoe]s?\s+(?:{LAW_PAT}|(?P<code>{CODE_PAT}))\b"
    ))
    .expect("ARTICLE_FULL_RE regex should compile")
});

static SUMULA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[Ss][úu]mula(?:\s+[Vv]inculante)?\s*(?:[nN][º°]?\.?\s*)?(?P<num>\d{1,4})(?:\s+d[aoe]s?\s+(?P<trib>(?i:STF|STJ|TST|TSE|STM)))?\b",
    )
    .expect("SUMULA_RE regex should compile")
});

static LAW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{LAW_PAT}\b")).expect("LAW_RE regex should compile")
});

static ARTICLE_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\b{ART_PAT}")).expect("ARTICLE_BARE_RE regex should compile"));

static CODE_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{CODE_PAT})\b")).expect("CODE_BARE_RE regex should compile")
});

static PARA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)§§?\s*\d{1,3}\s*[º°]?|par[áa]grafo\s+[úu]nico")
        .expect("PARA_RE regex should compile")
});

static INCISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binc(?:iso)?\.?\s+([ivxlcdm]+)\b").expect("INCISO_RE regex should compile")
});

static ALINEA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bal[íi]nea\s+[“”"']?([a-z])"#).expect("ALINEA_RE regex should compile")
});

// ── Claimed-span set ─────────────────────────────────────────────────────────

/// Sorted set of claimed spans; overlap checks via binary search.
#[derive(Default)]
struct Claims(Vec<Span>);

impl Claims {
    /// Claim `span` unless it overlaps an already-claimed span.
    fn try_claim(&mut self, span: Span) -> bool {
        let idx = self.0.partition_point(|s| s.end <= span.start);
        if idx < self.0.len() && self.0[idx].start < span.end {
            return false;
        }
        self.0.insert(idx, span);
        true
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Extract all citations from `text`, most-specific match winning overlaps.
pub fn extract(text: &str) -> Extraction {
    let mut claims = Claims::default();
    let mut out = Extraction::default();

    for caps in ARTICLE_FULL_RE.captures_iter(text) {
        push_article(&caps, text, &mut claims, &mut out);
    }
    for caps in SUMULA_RE.captures_iter(text) {
        push_sumula(&caps, &mut claims, &mut out);
    }
    for caps in LAW_RE.captures_iter(text) {
        push_law(&caps, &mut claims, &mut out);
    }
    for caps in ARTICLE_BARE_RE.captures_iter(text) {
        push_article(&caps, text, &mut claims, &mut out);
    }
    for caps in CODE_BARE_RE.captures_iter(text) {
        push_code(&caps, &mut claims, &mut out);
    }

    out.citations.sort_by_key(|c| c.source_span.start);
    out
}

fn whole_span(caps: &Captures) -> (Span, String) {
    let m = caps.get(0).expect("capture 0 always present");
    (
        Span {
            start: m.start(),
            end: m.end(),
        },
        m.as_str().to_string(),
    )
}

fn push_article(caps: &Captures, text: &str, claims: &mut Claims, out: &mut Extraction) {
    let (span, raw) = whole_span(caps);
    if !claims.try_claim(span) {
        return;
    }

    let article_number = caps
        .name("art")
        .map(|m| m.as_str().split_whitespace().collect::<String>());
    let quals = caps.name("quals").map(|m| m.as_str()).unwrap_or("");
    let paragraph = PARA_RE.find(quals).map(|m| m.as_str().to_string());
    let inciso = INCISO_RE
        .captures(quals)
        .map(|c| c[1].to_uppercase());
    let alinea = ALINEA_RE
        .captures(quals)
        .map(|c| c[1].to_lowercase());

    // Anchor: either a statute (kind/num/ano groups) or a code name.
    let code_or_law_id = if let Some(kind) = caps.name("kind") {
        let num = caps.name("num").expect("num present with kind");
        let raw_end = caps.name("ano").map(|m| m.end()).unwrap_or(num.end());
        let raw_law = &text[kind.start()..raw_end];
        Some(law_identifier(
            kind.as_str(),
            num.as_str(),
            caps.name("ano").map(|m| m.as_str()),
            raw_law,
            &mut out.parse_errors,
        ))
    } else {
        caps.name("code").map(|m| canonical_code(m.as_str()))
    };

    out.citations.push(Citation {
        citation_type: CitationType::Article,
        article_number,
        paragraph,
        inciso,
        alinea,
        code_or_law_id,
        raw_text: raw,
        source_span: span,
    });
}

fn push_sumula(caps: &Captures, claims: &mut Claims, out: &mut Extraction) {
    let (span, raw) = whole_span(caps);
    if !claims.try_claim(span) {
        return;
    }
    out.citations.push(Citation {
        citation_type: CitationType::Sumula,
        article_number: Some(caps["num"].to_string()),
        paragraph: None,
        inciso: None,
        alinea: None,
        code_or_law_id: caps.name("trib").map(|m| m.as_str().to_uppercase()),
        raw_text: raw,
        source_span: span,
    });
}

fn push_law(caps: &Captures, claims: &mut Claims, out: &mut Extraction) {
    let (span, raw) = whole_span(caps);
    if !claims.try_claim(span) {
        return;
    }
    let id = law_identifier(
        &caps["kind"],
        &caps["num"],
        caps.name("ano").map(|m| m.as_str()),
        &raw,
        &mut out.parse_errors,
    );
    out.citations.push(Citation {
        citation_type: CitationType::Law,
        article_number: None,
        paragraph: None,
        inciso: None,
        alinea: None,
        code_or_law_id: Some(id),
        raw_text: raw,
        source_span: span,
    });
}

fn push_code(caps: &Captures, claims: &mut Claims, out: &mut Extraction) {
    let (span, raw) = whole_span(caps);
    if !claims.try_claim(span) {
        return;
    }
    out.citations.push(Citation {
        citation_type: CitationType::CodeReference,
        article_number: None,
        paragraph: None,
        inciso: None,
        alinea: None,
        code_or_law_id: Some(canonical_code(&raw)),
        raw_text: raw,
        source_span: span,
    });
}

// ── Normalization ────────────────────────────────────────────────────────────

/// Normalized statute id ("Lei 8.112/1990"). An unparseable year keeps the
/// raw fragment and records a parse error: recall matters more than strict
/// normalization for downstream scoring.
fn law_identifier(
    kind: &str,
    num: &str,
    ano: Option<&str>,
    raw_law: &str,
    parse_errors: &mut Vec<String>,
) -> String {
    let kind = canonical_law_kind(kind);
    match ano {
        None => format!("{kind} {num}"),
        Some(frag) => match normalize_year(frag) {
            Ok(year) => format!("{kind} {num}/{year}"),
            Err(reason) => {
                parse_errors.push(format!("{reason} in '{raw_law}'"));
                raw_law.to_string()
            }
        },
    }
}

fn canonical_law_kind(kind: &str) -> &'static str {
    let k = kind.to_lowercase();
    if k.starts_with("lei complementar") {
        "LC"
    } else if k.starts_with("decreto") {
        "Decreto-Lei"
    } else if k.starts_with("medida") {
        "MP"
    } else {
        "Lei"
    }
}

/// Expand a year fragment to four digits. Two-digit values at or above
/// [`YEAR_CUTOFF`] map to 19xx, below it to 20xx.
fn normalize_year(frag: &str) -> Result<u32, String> {
    let value: u32 = frag
        .parse()
        .map_err(|_| format!("unparseable year fragment '{frag}'"))?;
    match frag.len() {
        4 => Ok(value),
        2 => Ok(if value >= YEAR_CUTOFF {
            1900 + value
        } else {
            2000 + value
        }),
        _ => Err(format!("ambiguous year fragment '{frag}'")),
    }
}

/// Canonicalize a code name or abbreviation to the fixed vocabulary.
/// "CF", "CRFB" and the long constitutional names all map to "CF/88".
fn canonical_code(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.starts_with("constitui") || lower == "cf" || lower == "cf/88" || lower.starts_with("crfb")
    {
        return "CF/88".to_string();
    }
    if lower.starts_with("consolida") {
        return "CLT".to_string();
    }
    if lower.starts_with("código") || lower.starts_with("codigo") {
        let canon = if lower.contains("processo civil") {
            "CPC"
        } else if lower.contains("processo penal") {
            "CPP"
        } else if lower.contains("defesa do consumidor") {
            "CDC"
        } else if lower.contains("tribut") {
            "CTN"
        } else if lower.contains("civil") {
            "CC"
        } else if lower.contains("penal") {
            "CP"
        } else {
            return raw.to_uppercase();
        };
        return canon.to_string();
    }
    raw.to_uppercase()
}
