//! Addressable path grammar
//!
//! Every estimable quantity is reachable by a textual path of the form
//! `block[label].parameter`, optionally narrowed to one element of a vector
//! (`parameter[index]`, 1-indexed) or a keyed map (`parameter{key}`, where a
//! numeric key addresses a year). This module is the single home of that
//! grammar; everything else works with the parsed form.

use crate::error::ModelError;

/// Which registry a path addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressBlock {
    Process,
    Selectivity,
    Catchability,
    AgeLength,
}

impl AddressBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressBlock::Process => "process",
            AddressBlock::Selectivity => "selectivity",
            AddressBlock::Catchability => "catchability",
            AddressBlock::AgeLength => "age_length",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "process" => Some(AddressBlock::Process),
            "selectivity" => Some(AddressBlock::Selectivity),
            "catchability" => Some(AddressBlock::Catchability),
            "age_length" => Some(AddressBlock::AgeLength),
            _ => None,
        }
    }
}

/// Narrowing applied to a parameter: none, a vector index, a string key or
/// a year key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKey {
    None,
    /// Zero-based element index (the path syntax is 1-indexed)
    Index(usize),
    Key(String),
    Year(u32),
}

/// A fully parsed addressable path
#[derive(Debug, Clone, PartialEq)]
pub struct AddressTarget {
    pub block: AddressBlock,
    pub label: String,
    pub parameter: String,
    pub key: AddressKey,
}

impl std::fmt::Display for AddressTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}].{}", self.block.as_str(), self.label, self.parameter)?;
        match &self.key {
            AddressKey::None => Ok(()),
            AddressKey::Index(i) => write!(f, "[{}]", i + 1),
            AddressKey::Key(key) => write!(f, "{{{}}}", key),
            AddressKey::Year(year) => write!(f, "{{{}}}", year),
        }
    }
}

/// Parse a path like `process[Recruitment].ycs_values{1989}`
pub fn parse_path(path: &str) -> Result<AddressTarget, ModelError> {
    let invalid = |reason: &str| ModelError::UnknownLabel {
        kind: "addressable path",
        label: format!("{} ({})", path, reason),
    };

    let open = path.find('[').ok_or_else(|| invalid("expected block[label]"))?;
    let close = path.find(']').ok_or_else(|| invalid("expected closing ]"))?;
    if close < open {
        return Err(invalid("malformed label brackets"));
    }

    let block = AddressBlock::parse(&path[..open])
        .ok_or_else(|| invalid("unknown block kind"))?;
    let label = path[open + 1..close].to_string();
    if label.is_empty() {
        return Err(invalid("empty label"));
    }

    let remainder = &path[close + 1..];
    let parameter_part = remainder
        .strip_prefix('.')
        .ok_or_else(|| invalid("expected .parameter after the label"))?;

    // optional trailing {key} or [index]
    if let Some(brace) = parameter_part.find('{') {
        let end = parameter_part
            .rfind('}')
            .ok_or_else(|| invalid("expected closing }"))?;
        let parameter = parameter_part[..brace].to_string();
        let key_text = &parameter_part[brace + 1..end];
        if parameter.is_empty() || key_text.is_empty() {
            return Err(invalid("empty parameter or key"));
        }
        let key = match key_text.parse::<u32>() {
            Ok(year) => AddressKey::Year(year),
            Err(_) => AddressKey::Key(key_text.to_string()),
        };
        return Ok(AddressTarget {
            block,
            label,
            parameter,
            key,
        });
    }

    if let Some(bracket) = parameter_part.find('[') {
        let end = parameter_part
            .rfind(']')
            .ok_or_else(|| invalid("expected closing ]"))?;
        let parameter = parameter_part[..bracket].to_string();
        let index: usize = parameter_part[bracket + 1..end]
            .parse()
            .map_err(|_| invalid("index is not a number"))?;
        if index == 0 {
            return Err(invalid("vector indices start at 1"));
        }
        return Ok(AddressTarget {
            block,
            label,
            parameter,
            key: AddressKey::Index(index - 1),
        });
    }

    if parameter_part.is_empty() {
        return Err(invalid("empty parameter"));
    }
    Ok(AddressTarget {
        block,
        label,
        parameter: parameter_part.to_string(),
        key: AddressKey::None,
    })
}
