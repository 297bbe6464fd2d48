//! Editable session model and the input-list operations the UI performs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single program input.
///
/// `id` only gives list operations a stable identity; the engine ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default = "fresh_id")]
    pub id: String,
    pub content: String,
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

impl Input {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: fresh_id(),
            content: content.into(),
        }
    }
}

/// Named, ordered set of inputs executed as one unit within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputGroup {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    /// Set by the engine once this group's run completed without interruption.
    #[serde(default)]
    pub succeeded: bool,
}

impl InputGroup {
    pub fn new<I, S>(name: impl Into<String>, contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: contents.into_iter().map(Input::new).collect(),
            succeeded: false,
        }
    }

    /// Raw input lines in order, as sent to the worker.
    pub fn lines(&self) -> Vec<String> {
        self.inputs.iter().map(|input| input.content.clone()).collect()
    }
}

/// Everything the user edits in the playground.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub header: String,
    pub code: String,
    pub footer: String,
    pub flags: Vec<String>,
    pub input_groups: Vec<InputGroup>,
    pub interpreter_version: String,
}

impl Session {
    /// Program text handed to the worker: header, code, and footer joined.
    pub fn program(&self) -> String {
        let mut program =
            String::with_capacity(self.header.len() + self.code.len() + self.footer.len());
        program.push_str(&self.header);
        program.push_str(&self.code);
        program.push_str(&self.footer);
        program
    }
}

/// List operations on a session's input groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InputsAction {
    AddGroup,
    DuplicateGroup { group: usize },
    DeleteGroup { group: usize },
    RenameGroup { group: usize, name: String },
    AppendInput { group: usize },
    ReorderInput { group: usize, input: usize, move_to: usize },
    DeleteInput { group: usize, input: usize },
    SetInput { group: usize, input: usize, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputsError {
    #[error("group {group} out of range ({len} groups)")]
    GroupOutOfRange { group: usize, len: usize },
    #[error("input {input} out of range in group {group} ({len} inputs)")]
    InputOutOfRange { group: usize, input: usize, len: usize },
}

/// Apply `action` to `groups`. On error the list is left unchanged.
pub fn apply_inputs_action(
    groups: &mut Vec<InputGroup>,
    action: InputsAction,
) -> Result<(), InputsError> {
    match action {
        InputsAction::AddGroup => {
            let name = format!("Group {}", groups.len() + 1);
            groups.push(InputGroup::new(name, Vec::<String>::new()));
        }
        InputsAction::DuplicateGroup { group } => {
            let source = group_ref(groups, group)?;
            let copy = InputGroup {
                name: source.name.clone(),
                inputs: source
                    .inputs
                    .iter()
                    .map(|input| Input::new(input.content.clone()))
                    .collect(),
                succeeded: false,
            };
            groups.push(copy);
        }
        InputsAction::DeleteGroup { group } => {
            group_ref(groups, group)?;
            groups.remove(group);
        }
        InputsAction::RenameGroup { group, name } => {
            group_mut(groups, group)?.name = name;
        }
        InputsAction::AppendInput { group } => {
            group_mut(groups, group)?.inputs.push(Input::new(""));
        }
        InputsAction::ReorderInput {
            group,
            input,
            move_to,
        } => {
            let target = group_mut(groups, group)?;
            let len = target.inputs.len();
            if input >= len {
                return Err(InputsError::InputOutOfRange { group, input, len });
            }
            // `move_to` indexes the list after the input has been taken out.
            if move_to >= len {
                return Err(InputsError::InputOutOfRange {
                    group,
                    input: move_to,
                    len,
                });
            }
            let moved = target.inputs.remove(input);
            target.inputs.insert(move_to, moved);
        }
        InputsAction::DeleteInput { group, input } => {
            let target = group_mut(groups, group)?;
            let len = target.inputs.len();
            if input >= len {
                return Err(InputsError::InputOutOfRange { group, input, len });
            }
            target.inputs.remove(input);
        }
        InputsAction::SetInput {
            group,
            input,
            content,
        } => {
            let target = group_mut(groups, group)?;
            let len = target.inputs.len();
            let slot = target
                .inputs
                .get_mut(input)
                .ok_or(InputsError::InputOutOfRange { group, input, len })?;
            slot.content = content;
        }
    }
    Ok(())
}

fn group_ref(groups: &[InputGroup], group: usize) -> Result<&InputGroup, InputsError> {
    groups.get(group).ok_or(InputsError::GroupOutOfRange {
        group,
        len: groups.len(),
    })
}

fn group_mut(groups: &mut [InputGroup], group: usize) -> Result<&mut InputGroup, InputsError> {
    let len = groups.len();
    groups
        .get_mut(group)
        .ok_or(InputsError::GroupOutOfRange { group, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(group: &InputGroup) -> Vec<&str> {
        group
            .inputs
            .iter()
            .map(|input| input.content.as_str())
            .collect()
    }

    #[test]
    fn program_joins_header_code_footer() {
        let session = Session {
            header: "1 ".to_string(),
            code: "2 +".to_string(),
            footer: " ,".to_string(),
            ..Session::default()
        };
        assert_eq!(session.program(), "1 2 + ,");
    }

    #[test]
    fn add_group_names_by_position() {
        let mut groups = vec![InputGroup::new("first", ["a"])];
        apply_inputs_action(&mut groups, InputsAction::AddGroup).expect("add");
        assert_eq!(groups[1].name, "Group 2");
        assert!(groups[1].inputs.is_empty());
    }

    #[test]
    fn duplicate_group_assigns_fresh_ids() {
        let mut groups = vec![InputGroup::new("g", ["x", "y"])];
        apply_inputs_action(&mut groups, InputsAction::DuplicateGroup { group: 0 })
            .expect("duplicate");
        assert_eq!(groups.len(), 2);
        assert_eq!(contents(&groups[1]), vec!["x", "y"]);
        assert_ne!(groups[0].inputs[0].id, groups[1].inputs[0].id);
    }

    #[test]
    fn reorder_input_moves_to_position_after_removal() {
        let mut groups = vec![InputGroup::new("g", ["a", "b", "c"])];
        apply_inputs_action(
            &mut groups,
            InputsAction::ReorderInput {
                group: 0,
                input: 0,
                move_to: 2,
            },
        )
        .expect("reorder");
        assert_eq!(contents(&groups[0]), vec!["b", "c", "a"]);
    }

    #[test]
    fn delete_input_removes_only_that_input() {
        let mut groups = vec![InputGroup::new("g", ["a", "b", "c"])];
        apply_inputs_action(&mut groups, InputsAction::DeleteInput { group: 0, input: 1 })
            .expect("delete");
        assert_eq!(contents(&groups[0]), vec!["a", "c"]);
    }

    #[test]
    fn out_of_range_leaves_groups_unchanged() {
        let mut groups = vec![InputGroup::new("g", ["a"])];
        let before = groups.clone();
        let err = apply_inputs_action(
            &mut groups,
            InputsAction::SetInput {
                group: 0,
                input: 3,
                content: "z".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            InputsError::InputOutOfRange {
                group: 0,
                input: 3,
                len: 1
            }
        );
        assert_eq!(groups, before);

        let err = apply_inputs_action(&mut groups, InputsAction::DeleteGroup { group: 4 })
            .unwrap_err();
        assert!(matches!(err, InputsError::GroupOutOfRange { group: 4, len: 1 }));
        assert_eq!(groups, before);
    }

    #[test]
    fn session_json_fills_missing_fields() {
        let session: Session = serde_json::from_str(r#"{"code":"1+"}"#).expect("parse");
        assert_eq!(session.code, "1+");
        assert!(session.input_groups.is_empty());
        assert!(session.flags.is_empty());
    }
}
