//! Dependency chains between resolvable fields.

use std::collections::HashSet;

use super::{FieldAccessor, ModelError, Result, TagId};

/// One hop: `target` is resolved through `tag` from the value of `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyStep {
    pub target: &'static str,
    pub source: &'static str,
    pub tag: TagId,
    pub expression: String,
}

/// The chain of steps needed before a field can be resolved. The first step
/// is the field itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyChain {
    steps: Vec<DependencyStep>,
}

impl DependencyChain {
    pub fn steps(&self) -> &[DependencyStep] {
        &self.steps
    }

    /// The field's own step.
    pub fn head(&self) -> &DependencyStep {
        // Chains are only built with at least the field's own step.
        &self.steps[0]
    }

    /// Resolution order: 0 when the required field depends on nothing.
    pub fn order(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}

/// Follow `required` links from `start` until a field without a tag.
///
/// The visited set is scoped to this chain, so two fields sharing an
/// intermediate dependency are fine while a field reaching itself is not.
pub(super) fn build_chain(
    model: &'static str,
    fields: &[FieldAccessor],
    start: &FieldAccessor,
) -> Result<Option<DependencyChain>> {
    let Some(tag) = start.tag() else {
        return Ok(None);
    };

    let mut steps = Vec::new();
    let mut visited = HashSet::new();
    let mut current = start;
    let mut current_tag = tag;

    loop {
        if !visited.insert(current.name()) {
            let mut chain: Vec<_> = steps.iter().map(|s: &DependencyStep| s.target).collect();
            chain.push(current.name());
            return Err(ModelError::CyclicDependency {
                model,
                field: start.name(),
                chain,
            });
        }

        let required = fields
            .iter()
            .find(|f| f.name() == current_tag.required)
            .ok_or(ModelError::UnknownField {
                model,
                field: current.name(),
                required: current_tag.required,
            })?;

        steps.push(DependencyStep {
            target: current.name(),
            source: required.name(),
            tag: current_tag.tag,
            expression: current_tag
                .expression
                .clone()
                .unwrap_or_else(|| current.name().to_string()),
        });

        match required.tag() {
            Some(next) => {
                current = required;
                current_tag = next;
            }
            None => break,
        }
    }

    if !fields
        .iter()
        .any(|f| f.name() == steps[0].source && f.is_readable())
    {
        return Err(ModelError::UnreadableField {
            model,
            field: steps[0].source,
        });
    }

    Ok(Some(DependencyChain { steps }))
}
