//! Pick/fixup plans and their editable text form.
//!
//! A plan lists what to do with each build step, in build order:
//!
//! ```text
//! pick     0 sha256:4f4f...  # ADD rootfs.tar /
//! pick     1 (empty layer)  # ENV PATH=/usr/bin
//! fixup    2 sha256:9a1c...  # RUN apk add curl
//! ```
//!
//! `fixup` folds a layer into the step above it.

use std::fmt;
use std::str::FromStr;

use restack_core::error::{RestackError, Result};

use super::enumerate::LayerRecord;
use crate::oci::layers::{ContentLayer, HistoryEntry};

/// What to do with a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Keep the layer as its own output layer
    Pick,
    /// Merge the layer into the preceding picked layer
    Fixup,
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pick" | "p" => Ok(Self::Pick),
            "fixup" | "f" => Ok(Self::Fixup),
            other => Err(format!("unknown intent '{}'", other)),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pad so that width specifiers apply
        let name = match self {
            Self::Pick => "pick",
            Self::Fixup => "fixup",
        };
        f.pad(name)
    }
}

/// One plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub intent: Intent,
    pub layer: Option<ContentLayer>,
    pub history: HistoryEntry,
    /// Index of the record this action came from
    pub index: usize,
}

impl Action {
    pub fn from_record(record: &LayerRecord, intent: Intent) -> Self {
        Self {
            intent,
            layer: record.layer.clone(),
            history: record.history.clone(),
            index: record.index,
        }
    }
}

/// Ordered list of actions, executed first to last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Plan that keeps every record as is.
    pub fn from_records(records: &[LayerRecord]) -> Self {
        Self::new(
            records
                .iter()
                .map(|r| Action::from_record(r, Intent::Pick))
                .collect(),
        )
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of filesystem layers the plan will produce.
    pub fn output_layer_count(&self) -> usize {
        let mut count = 0;
        let mut open = false;
        for action in &self.actions {
            match action.intent {
                Intent::Pick => {
                    open = action.layer.is_some();
                    if open {
                        count += 1;
                    }
                }
                Intent::Fixup if !open => {
                    open = true;
                    count += 1;
                }
                Intent::Fixup => {}
            }
        }
        count
    }

    /// Reject plans that cannot produce a sensible image.
    ///
    /// The engine reports these cases itself while running; this check lets
    /// callers fail before any work is done.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .actions
            .first()
            .ok_or_else(|| RestackError::InvalidPlan("plan is empty".to_string()))?;

        if first.intent == Intent::Fixup {
            return Err(RestackError::InvalidPlan(format!(
                "plan starts with fixup of layer {}; the first action must be a pick",
                first.index
            )));
        }

        if let Some(action) = self
            .actions
            .iter()
            .find(|a| a.intent == Intent::Fixup && a.layer.is_none())
        {
            return Err(RestackError::InvalidPlan(format!(
                "layer {} is an empty layer and cannot be fixed up",
                action.index
            )));
        }

        Ok(())
    }
}

const PLAN_HELP: &str = "\
#
# Commands:
# p, pick <layer> = keep layer as is
# f, fixup <layer> = merge layer into the one above it
#
# Lines are executed top to bottom. Lines starting with '#' are ignored.
";

/// Render `records` as an all-pick plan listing.
pub fn render_plan(records: &[LayerRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let desc = record
            .layer
            .as_ref()
            .map(|l| l.diff_id.as_str())
            .unwrap_or("(empty layer)");
        out.push_str(&format_line(Intent::Pick, record.index, desc, &record.history));
    }
    out.push_str(PLAN_HELP);
    out
}

/// Render an existing plan in the same format as [`render_plan`].
pub fn render_actions(plan: &Plan) -> String {
    plan.actions()
        .iter()
        .map(|a| {
            let desc = a
                .layer
                .as_ref()
                .map(|l| l.diff_id.as_str())
                .unwrap_or("(empty layer)");
            format_line(a.intent, a.index, desc, &a.history)
        })
        .collect()
}

fn format_line(intent: Intent, index: usize, desc: &str, history: &HistoryEntry) -> String {
    let created_by = history.created_by_line().replace('\n', " ");
    format!("{:<6} {:>3} {}  # {}\n", intent, index, desc, created_by.trim())
}

/// Parse a plan listing back into a plan over `records`.
///
/// Each non-comment line is `<intent> <index> [anything]`. Lines may appear
/// in any order and may repeat or omit records.
pub fn parse_plan(text: &str, records: &[LayerRecord]) -> Result<Plan> {
    let mut plan = Plan::default();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let syntax = |message: String| RestackError::InvalidPlanSyntax {
            line: lineno + 1,
            message,
        };

        let mut fields = line.split_whitespace();
        let intent: Intent = fields
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(syntax)?;
        let raw_index = fields
            .next()
            .ok_or_else(|| syntax("missing layer index".to_string()))?;
        let index: usize = raw_index
            .parse()
            .map_err(|_| syntax(format!("invalid layer index '{}'", raw_index)))?;
        let record = records.get(index).ok_or_else(|| {
            syntax(format!(
                "layer index {} out of range (image has {} entries)",
                index,
                records.len()
            ))
        })?;

        plan.push(Action::from_record(record, intent));
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn records() -> Vec<LayerRecord> {
        let layer = |n: usize| ContentLayer {
            digest: format!("sha256:blob{}", n),
            diff_id: format!("sha256:diff{}", n),
            size: 10,
            media_type: crate::oci::layers::OCI_LAYER_GZIP.to_string(),
            path: PathBuf::from(format!("/b/{}", n)),
        };
        let history = |s: &str, empty: bool| HistoryEntry {
            created_by: Some(s.to_string()),
            empty_layer: empty.then_some(true),
            ..Default::default()
        };

        vec![
            LayerRecord {
                index: 0,
                history: history("ADD rootfs /", false),
                layer: Some(layer(0)),
                layer_index: Some(0),
            },
            LayerRecord {
                index: 1,
                history: history("ENV A=1", true),
                layer: None,
                layer_index: None,
            },
            LayerRecord {
                index: 2,
                history: history("RUN make\ninstall", false),
                layer: Some(layer(1)),
                layer_index: Some(1),
            },
        ]
    }

    #[test]
    fn test_intent_parse() {
        assert_eq!("pick".parse::<Intent>().unwrap(), Intent::Pick);
        assert_eq!("P".parse::<Intent>().unwrap(), Intent::Pick);
        assert_eq!("FIXUP".parse::<Intent>().unwrap(), Intent::Fixup);
        assert_eq!("f".parse::<Intent>().unwrap(), Intent::Fixup);
        assert!("squash".parse::<Intent>().is_err());
    }

    #[test]
    fn test_identity_plan() {
        let recs = records();
        let plan = Plan::from_records(&recs);
        assert_eq!(plan.len(), 3);
        assert!(plan.actions().iter().all(|a| a.intent == Intent::Pick));
        assert_eq!(plan.output_layer_count(), 2);
        plan.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_plan() {
        assert!(matches!(
            Plan::default().validate(),
            Err(RestackError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_validate_rejects_leading_fixup() {
        let recs = records();
        let plan = Plan::new(vec![
            Action::from_record(&recs[0], Intent::Fixup),
            Action::from_record(&recs[2], Intent::Pick),
        ]);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("first action must be a pick"));
    }

    #[test]
    fn test_validate_rejects_fixup_of_empty_layer() {
        let recs = records();
        let plan = Plan::new(vec![
            Action::from_record(&recs[0], Intent::Pick),
            Action::from_record(&recs[1], Intent::Fixup),
        ]);
        assert!(plan.validate().unwrap_err().to_string().contains("layer 1"));
    }

    #[test]
    fn test_output_layer_count_with_fixups() {
        let recs = records();
        let plan = Plan::new(vec![
            Action::from_record(&recs[0], Intent::Pick),
            Action::from_record(&recs[1], Intent::Pick),
            Action::from_record(&recs[2], Intent::Fixup),
        ]);
        // The empty-layer pick gets the fixup's content as a fresh layer
        assert_eq!(plan.output_layer_count(), 2);

        let plan = Plan::new(vec![
            Action::from_record(&recs[0], Intent::Pick),
            Action::from_record(&recs[2], Intent::Fixup),
        ]);
        assert_eq!(plan.output_layer_count(), 1);
    }

    #[test]
    fn test_render_plan_format() {
        let text = render_plan(&records());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "pick     0 sha256:diff0  # ADD rootfs /");
        assert_eq!(lines[1], "pick     1 (empty layer)  # ENV A=1");
        assert_eq!(lines[2], "pick     2 sha256:diff1  # RUN make install");
        assert!(lines[3].starts_with('#'));
    }

    #[test]
    fn test_parse_rendered_plan_is_identity() {
        let recs = records();
        let plan = parse_plan(&render_plan(&recs), &recs).unwrap();
        assert_eq!(plan, Plan::from_records(&recs));
    }

    #[test]
    fn test_parse_edited_plan() {
        let recs = records();
        let text = "p 0\n\n# comment\n  f 2 anything here\n";
        let plan = parse_plan(text, &recs).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.actions()[1].intent, Intent::Fixup);
        assert_eq!(plan.actions()[1].index, 2);
        assert_eq!(plan.actions()[1].layer, recs[2].layer);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let recs = records();

        let err = parse_plan("pick 0\nsquash 2\n", &recs).unwrap_err();
        assert!(matches!(err, RestackError::InvalidPlanSyntax { line: 2, .. }));

        let err = parse_plan("pick\n", &recs).unwrap_err();
        assert!(err.to_string().contains("missing layer index"));

        let err = parse_plan("pick x\n", &recs).unwrap_err();
        assert!(err.to_string().contains("invalid layer index 'x'"));

        let err = parse_plan("pick 0\n\npick 9\n", &recs).unwrap_err();
        match err {
            RestackError::InvalidPlanSyntax { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("out of range"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_actions() {
        let recs = records();
        let plan = Plan::new(vec![
            Action::from_record(&recs[0], Intent::Pick),
            Action::from_record(&recs[2], Intent::Fixup),
        ]);
        let text = render_actions(&plan);
        assert_eq!(
            text,
            "pick     0 sha256:diff0  # ADD rootfs /\nfixup    2 sha256:diff1  # RUN make install\n"
        );
    }
}
