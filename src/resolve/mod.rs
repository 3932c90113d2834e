//! Rule Resolution Engine
//!
//! Resolves the counterpart script for a record by applying layered rules:
//!
//! 1. **Direct map**: source script → starting identity (first declared match)
//! 2. **Rule groups**: scoped keyword rules, then name-pattern rules, applied
//!    repeatedly until the identity stops changing
//!
//! Within a layer the matching rule with the smallest priority number wins;
//! equal priorities fall back to declaration order. A chain that revisits an
//! identity is a [`ResolveError::Cycle`].
//!
//! The engine is a pure function of `(identity, attributes)`. All rule-table
//! defects are reported by [`RuleEngine::new`], before any record is touched.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::{DirectMapping, KeywordRuleConfig, NameRuleConfig, RuleStoreConfig};
use crate::error::{ResolveError, RuleLayer};
use crate::record::{Record, RecordRef, ScriptIdentity};

const UNGROUPED: &str = "<ungrouped>";

/// The attributes of a record that rules can match on
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordAttributes<'a> {
    pub keywords: &'a [RecordRef],
    /// Display name
    pub name: Option<&'a str>,
}

impl<'a> RecordAttributes<'a> {
    pub fn of(record: &'a Record) -> Self {
        Self {
            keywords: &record.keywords,
            name: record.name.as_deref(),
        }
    }
}

// ============================================================================
// DIRECT MAP
// ============================================================================

/// Output identity → accepted inputs, in declaration order
#[derive(Debug, Clone, Default)]
pub struct DirectMap {
    entries: Vec<DirectMapping>,
}

impl DirectMap {
    /// Build a direct map. Overlapping inputs are logged, first entry wins.
    pub fn new(entries: &[DirectMapping]) -> Self {
        let mut seen: HashSet<&ScriptIdentity> = HashSet::new();
        for entry in entries {
            for input in &entry.inputs {
                if !seen.insert(input) {
                    warn!(
                        input = %input,
                        output = %entry.output,
                        "direct map input listed more than once; first entry wins"
                    );
                }
            }
        }
        Self {
            entries: entries.to_vec(),
        }
    }

    pub fn lookup(&self, identity: &str) -> Option<&ScriptIdentity> {
        self.entries
            .iter()
            .find(|e| e.inputs.iter().any(|i| i.as_str() == identity))
            .map(|e| &e.output)
    }

    pub fn is_output(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.output.as_str() == identity)
    }

    pub fn is_input(&self, identity: &str) -> bool {
        self.lookup(identity).is_some()
    }
}

// ============================================================================
// COMPILED RULES
// ============================================================================

trait Rule {
    fn priority(&self) -> i32;
    fn inputs(&self) -> &HashSet<ScriptIdentity>;
    fn output(&self) -> &ScriptIdentity;
    fn label(&self) -> &str;
}

#[derive(Debug)]
struct KeywordRule {
    label: String,
    priority: i32,
    keywords: HashSet<RecordRef>,
    inputs: HashSet<ScriptIdentity>,
    output: ScriptIdentity,
}

impl KeywordRule {
    fn matches(&self, attrs: &RecordAttributes<'_>) -> bool {
        attrs.keywords.iter().any(|k| self.keywords.contains(k))
    }
}

#[derive(Debug)]
struct NameRule {
    label: String,
    priority: i32,
    pattern: Regex,
    inputs: HashSet<ScriptIdentity>,
    output: ScriptIdentity,
}

impl NameRule {
    fn matches(&self, attrs: &RecordAttributes<'_>) -> bool {
        attrs.name.is_some_and(|name| self.pattern.is_match(name))
    }
}

macro_rules! impl_rule {
    ($ty:ty) => {
        impl Rule for $ty {
            fn priority(&self) -> i32 {
                self.priority
            }
            fn inputs(&self) -> &HashSet<ScriptIdentity> {
                &self.inputs
            }
            fn output(&self) -> &ScriptIdentity {
                &self.output
            }
            fn label(&self) -> &str {
                &self.label
            }
        }
    };
}

impl_rule!(KeywordRule);
impl_rule!(NameRule);

/// Smallest priority among rules accepting `identity` and matching; first
/// declared wins ties.
fn select<'r, R: Rule>(
    rules: impl IntoIterator<Item = &'r R>,
    identity: &str,
    matches: impl Fn(&R) -> bool,
) -> Option<&'r R>
where
    R: 'r,
{
    rules
        .into_iter()
        .filter(|r| r.inputs().contains(identity) && matches(*r))
        .min_by_key(|r| r.priority())
}

#[derive(Debug)]
struct RuleGroup {
    label: String,
    inputs: HashSet<ScriptIdentity>,
    keyword_rules: Vec<KeywordRule>,
    name_rules: Vec<NameRule>,
}

impl RuleGroup {
    fn accepts(&self, identity: &str) -> bool {
        self.inputs.contains(identity)
    }
}

fn rule_label(group: &str, kind: &str, index: usize, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{group}/{name}"),
        None => format!("{group}/{kind}[{index}]"),
    }
}

/// Rule inputs, falling back to the enclosing group's inputs when empty
fn rule_inputs(
    own: &[ScriptIdentity],
    inherited: Option<&HashSet<ScriptIdentity>>,
    group: &str,
) -> Result<HashSet<ScriptIdentity>, ResolveError> {
    if !own.is_empty() {
        return Ok(own.iter().cloned().collect());
    }
    match inherited {
        Some(inputs) => Ok(inputs.clone()),
        None => Err(ResolveError::EmptyInputSet {
            group: group.to_string(),
        }),
    }
}

fn compile_keyword_rule(
    config: &KeywordRuleConfig,
    label: String,
    inherited: Option<&HashSet<ScriptIdentity>>,
) -> Result<KeywordRule, ResolveError> {
    let output = config
        .output
        .clone()
        .ok_or_else(|| ResolveError::MissingOutput {
            layer: RuleLayer::Keyword,
            rule: label.clone(),
        })?;
    Ok(KeywordRule {
        inputs: rule_inputs(&config.inputs, inherited, &label)?,
        priority: config.priority,
        keywords: config.keywords.iter().cloned().collect(),
        output,
        label,
    })
}

fn compile_name_rule(
    config: &NameRuleConfig,
    label: String,
    inherited: Option<&HashSet<ScriptIdentity>>,
) -> Result<NameRule, ResolveError> {
    let output = config
        .output
        .clone()
        .ok_or_else(|| ResolveError::MissingOutput {
            layer: RuleLayer::NamePattern,
            rule: label.clone(),
        })?;
    let pattern = RegexBuilder::new(&config.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ResolveError::InvalidPattern {
            rule: label.clone(),
            pattern: config.pattern.clone(),
            source,
        })?;
    Ok(NameRule {
        inputs: rule_inputs(&config.inputs, inherited, &label)?,
        priority: config.priority,
        pattern,
        output,
        label,
    })
}

// ============================================================================
// ENGINE
// ============================================================================

/// Compiled, immutable rule store
#[derive(Debug)]
pub struct RuleEngine {
    direct: DirectMap,
    groups: Vec<RuleGroup>,
}

impl RuleEngine {
    /// Compile a rule store
    ///
    /// Fails on a group with no inputs, a rule with no output, an ungrouped
    /// rule with no inputs, or a name pattern that does not compile.
    pub fn new(config: &RuleStoreConfig) -> Result<Self, ResolveError> {
        let mut groups = Vec::with_capacity(config.groups.len() + 1);

        for (index, group) in config.groups.iter().enumerate() {
            let label = group
                .name
                .clone()
                .unwrap_or_else(|| format!("group[{index}]"));
            if group.inputs.is_empty() {
                return Err(ResolveError::EmptyInputSet { group: label });
            }
            let inputs: HashSet<ScriptIdentity> = group.inputs.iter().cloned().collect();

            let keyword_rules = group
                .keyword_rules
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let rule = rule_label(&label, "keyword", i, r.name.as_deref());
                    compile_keyword_rule(r, rule, Some(&inputs))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let name_rules = group
                .name_rules
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let rule = rule_label(&label, "name", i, r.name.as_deref());
                    compile_name_rule(r, rule, Some(&inputs))
                })
                .collect::<Result<Vec<_>, _>>()?;

            groups.push(RuleGroup {
                label,
                inputs,
                keyword_rules,
                name_rules,
            });
        }

        // Ungrouped rules form a final implicit group
        if !config.keyword_rules.is_empty() || !config.name_rules.is_empty() {
            let keyword_rules = config
                .keyword_rules
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let rule = rule_label(UNGROUPED, "keyword", i, r.name.as_deref());
                    compile_keyword_rule(r, rule, None)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let name_rules = config
                .name_rules
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let rule = rule_label(UNGROUPED, "name", i, r.name.as_deref());
                    compile_name_rule(r, rule, None)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let inputs = keyword_rules
                .iter()
                .flat_map(|r| r.inputs.iter())
                .chain(name_rules.iter().flat_map(|r| r.inputs.iter()))
                .cloned()
                .collect();

            groups.push(RuleGroup {
                label: UNGROUPED.to_string(),
                inputs,
                keyword_rules,
                name_rules,
            });
        }

        Ok(Self {
            direct: DirectMap::new(&config.direct),
            groups,
        })
    }

    pub fn direct_map(&self) -> &DirectMap {
        &self.direct
    }

    /// Whether `identity` is something this store can produce
    pub fn is_output(&self, identity: &str) -> bool {
        self.direct.is_output(identity)
            || self.groups.iter().any(|g| {
                g.keyword_rules.iter().any(|r| r.output.as_str() == identity)
                    || g.name_rules.iter().any(|r| r.output.as_str() == identity)
            })
    }

    /// Direct-map lookup
    pub fn match_direct(&self, identity: &str) -> Option<&ScriptIdentity> {
        self.direct.lookup(identity)
    }

    /// Best keyword rule across every group in scope of `identity`
    pub fn match_keyword(
        &self,
        identity: &str,
        attrs: &RecordAttributes<'_>,
    ) -> Option<&ScriptIdentity> {
        let in_scope = self
            .groups
            .iter()
            .filter(|g| g.accepts(identity))
            .flat_map(|g| g.keyword_rules.iter());
        select(in_scope, identity, |r| r.matches(attrs)).map(Rule::output)
    }

    /// Best name-pattern rule across every group in scope of `identity`
    pub fn match_name(
        &self,
        identity: &str,
        attrs: &RecordAttributes<'_>,
    ) -> Option<&ScriptIdentity> {
        let in_scope = self
            .groups
            .iter()
            .filter(|g| g.accepts(identity))
            .flat_map(|g| g.name_rules.iter());
        select(in_scope, identity, |r| r.matches(attrs)).map(Rule::output)
    }

    /// One round of grouped application
    ///
    /// Groups accepting `identity` are tried in declaration order; within a
    /// group keyword rules come before name rules. The first result that
    /// differs from `identity` is returned, otherwise `identity` itself.
    pub fn apply_group(
        &self,
        identity: &ScriptIdentity,
        attrs: &RecordAttributes<'_>,
    ) -> ScriptIdentity {
        let current = identity.as_str();
        for group in self.groups.iter().filter(|g| g.accepts(current)) {
            if let Some(rule) = select(&group.keyword_rules, current, |r| r.matches(attrs)) {
                if rule.output() != identity {
                    debug!(
                        group = %group.label,
                        rule = rule.label(),
                        from = current,
                        to = %rule.output(),
                        "keyword rule applied"
                    );
                    return rule.output().clone();
                }
            }
            if let Some(rule) = select(&group.name_rules, current, |r| r.matches(attrs)) {
                if rule.output() != identity {
                    debug!(
                        group = %group.label,
                        rule = rule.label(),
                        from = current,
                        to = %rule.output(),
                        "name rule applied"
                    );
                    return rule.output().clone();
                }
            }
        }
        identity.clone()
    }

    /// Single resolution step: the rewritten identity, or None if unchanged
    pub fn resolve_once(
        &self,
        identity: &ScriptIdentity,
        attrs: &RecordAttributes<'_>,
    ) -> Option<ScriptIdentity> {
        let next = self.apply_group(identity, attrs);
        (next != *identity).then_some(next)
    }

    /// Full chain resolution from a source-system script
    ///
    /// Returns `Ok(None)` when the source has no direct-map entry.
    pub fn resolve_chain(
        &self,
        source: &str,
        attrs: &RecordAttributes<'_>,
    ) -> Result<Option<ScriptIdentity>, ResolveError> {
        let Some(start) = self.match_direct(source) else {
            return Ok(None);
        };

        let mut chain = vec![start.clone()];
        let mut seen: HashSet<ScriptIdentity> = HashSet::from([start.clone()]);
        let mut current = start.clone();

        while let Some(next) = self.resolve_once(&current, attrs) {
            if seen.contains(&next) {
                chain.push(next.clone());
                return Err(ResolveError::Cycle {
                    from: current,
                    to: next,
                    chain,
                });
            }
            seen.insert(next.clone());
            chain.push(next.clone());
            current = next;
        }

        debug!(source, resolved = %current, steps = chain.len() - 1, "resolved script chain");
        Ok(Some(current))
    }
}
