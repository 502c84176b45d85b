use std::collections::HashMap;

use fishwatch_model::fact::FactType;

use crate::error::TemplateError;

/// Grammar shipped for custom rules. Columns: name, expression, action, guid.
pub const CUSTOM_RULES_TEMPLATE: &str = include_str!("../templates/custom_rules.tpl");
/// Grammar shipped for sanity rules. Columns: name, expression.
pub const SANITY_RULES_TEMPLATE: &str = include_str!("../templates/sanity_rules.tpl");

/// Business rule grammars, one per fact type. Columns: brId, expression,
/// message, errorType, level, propertyNames.
pub const RAW_MOVEMENT_RULES_TEMPLATE: &str = include_str!("../templates/business/raw_movement.tpl");
pub const MOVEMENT_RULES_TEMPLATE: &str = include_str!("../templates/business/movement.tpl");
pub const SALES_PRICE_RULES_TEMPLATE: &str = include_str!("../templates/business/sales_price.tpl");
pub const FISHING_ACTIVITY_RULES_TEMPLATE: &str =
    include_str!("../templates/business/fishing_activity.tpl");

/// Bundled business rule grammar for `fact_type`.
pub fn business_template(fact_type: FactType) -> &'static str {
    match fact_type {
        FactType::RawMovement => RAW_MOVEMENT_RULES_TEMPLATE,
        FactType::Movement => MOVEMENT_RULES_TEMPLATE,
        FactType::SalesPrice => SALES_PRICE_RULES_TEMPLATE,
        FactType::FishingActivity => FISHING_ACTIVITY_RULES_TEMPLATE,
    }
}

const HEADER: &str = "template header";
const END: &str = "end template";

/// A parsed template grammar: declared parameters, a preamble emitted once
/// and a body emitted once per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateGrammar {
    name: String,
    params: Vec<String>,
    preamble: String,
    body: Vec<Piece>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Param(usize),
}

impl TemplateGrammar {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut lines = text.lines().peekable();

        while lines.peek().map_or(false, |line| line.trim().is_empty()) {
            lines.next();
        }
        match lines.next() {
            Some(line) if line.trim() == HEADER => {}
            _ => return Err(TemplateError::MissingHeader),
        }

        let mut params = Vec::new();
        for line in lines.by_ref() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            params.push(line.to_string());
        }
        if params.is_empty() {
            return Err(TemplateError::NoParameters);
        }

        let mut preamble = String::new();
        let mut name = None;
        for line in lines.by_ref() {
            if let Some(declared) = template_name(line) {
                name = Some(declared);
                break;
            }
            preamble.push_str(line);
            preamble.push('\n');
        }
        let name = name.ok_or(TemplateError::MissingTemplate)?;

        let mut body = String::new();
        let mut terminated = false;
        for line in lines {
            if line.trim() == END {
                terminated = true;
                break;
            }
            body.push_str(line);
            body.push('\n');
        }
        if !terminated {
            return Err(TemplateError::UnterminatedTemplate { name });
        }

        let body = split_placeholders(&body, &params)?;
        Ok(Self {
            name,
            params,
            preamble,
            body,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Renders the preamble followed by one body per row. Cells are matched
    /// to parameters by column index; missing cells render empty.
    pub fn render<R, C>(&self, rows: &[R]) -> String
    where
        R: AsRef<[C]>,
        C: AsRef<str>,
    {
        let mut out = self.preamble.clone();
        for row in rows {
            let cells = row.as_ref();
            for piece in &self.body {
                match piece {
                    Piece::Text(text) => out.push_str(text),
                    Piece::Param(index) => {
                        if let Some(cell) = cells.get(*index) {
                            out.push_str(cell.as_ref());
                        }
                    }
                }
            }
        }
        out
    }
}

fn template_name(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("template ")?.trim();
    let name = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some(name.to_string())
}

fn split_placeholders(body: &str, params: &[String]) -> Result<Vec<Piece>, TemplateError> {
    let index: HashMap<&str, usize> = params
        .iter()
        .enumerate()
        .map(|(i, param)| (param.as_str(), i))
        .collect();

    let mut pieces = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("@{") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let param = *index
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder {
                name: name.to_string(),
            })?;
        if start > 0 {
            pieces.push(Piece::Text(rest[..start].to_string()));
        }
        pieces.push(Piece::Param(param));
        rest = &rest[start + 2 + len + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }
    Ok(pieces)
}

/// Renders `rows` with `grammar`.
pub fn render<R, C>(grammar: &TemplateGrammar, rows: &[R]) -> String
where
    R: AsRef<[C]>,
    C: AsRef<str>,
{
    grammar.render(rows)
}
