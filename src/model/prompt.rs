//! Prompt assembly for interactive episodes.
//!
//! The initial prompt is built from three parts separated by `\n---\n`:
//! an instruction block, a few in-context example transcripts, and the
//! current task. It is produced in two shapes at once:
//!
//! - a flattened string, used when the conversation is seeded with a single
//!   user turn;
//! - a list of turns (`system` instruction, example transcripts as real
//!   user/assistant turns, final `user` task turn).
//!
//! This module also owns the fixed wording used to splice a workflow hint
//! into the query, the observation stream, or the agent's reasoning prefix.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::EnvKind;
use crate::model::api::{ChatMessage, Role};

pub const SECTION_SEPARATOR: &str = "\n---\n";

/// Introduces a hint in the query and in observation turns.
pub const WORKFLOW_INTRO: &str = "This workflow maybe helpful for you to complete the task:";

/// Introduces a hint in the agent's continuation prefix.
pub const WORKFLOW_THOUGHT_INTRO: &str = "This workflow maybe helpful to complete the task:";

/// The agent resumes reasoning after this marker in thought mode.
pub const THOUGHT_MARKER: &str = "Thought: ";

const EXAMPLE_HEADER: &str = "Here is an example:";
const TASK_HEADER: &str = "Now, it's your turn and here is the task.";

/// One in-context example: an ordered transcript of turns.
pub type Transcript = Vec<ChatMessage>;

/// In-context examples, either keyed by task category or shared by all tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExampleSet {
    ByCategory(HashMap<String, Vec<Transcript>>),
    Shared(Vec<Transcript>),
}

/// Instruction block and in-context examples for one environment family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAssets {
    pub instruction: String,
    pub examples: ExampleSet,
}

/// The assembled initial prompt in both representations.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialPrompt {
    /// Instruction, examples and task flattened into one string.
    pub observation: String,
    /// The same content as a multi-turn conversation.
    pub messages: Vec<ChatMessage>,
}

impl PromptAssets {
    /// Load assets from a JSON file with `instruction` and `examples` keys.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt assets from {}", path.display()))?;
        let assets: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse prompt assets from {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded prompt assets");
        Ok(assets)
    }

    /// The in-context examples for a task category.
    ///
    /// Shared example sets ignore the category.
    pub fn examples_for(&self, category: Option<&str>) -> Result<&[Transcript]> {
        match (&self.examples, category) {
            (ExampleSet::Shared(all), _) => Ok(all),
            (ExampleSet::ByCategory(map), Some(cat)) => map
                .get(cat)
                .map(Vec::as_slice)
                .with_context(|| format!("no in-context examples for category '{cat}'")),
            (ExampleSet::ByCategory(_), None) => {
                anyhow::bail!("in-context examples are keyed by category but none was given")
            }
        }
    }

    /// Built-in assets used when no prompt file is configured.
    pub fn builtin(kind: EnvKind) -> Self {
        match kind {
            EnvKind::Alfworld => builtin_alfworld(),
            EnvKind::Sciworld => builtin_sciworld(),
        }
    }
}

/// Build the initial prompt for `task`, optionally splicing `workflow` into
/// the task description.
pub fn prompt_with_icl(
    instruction: &str,
    examples: &[Transcript],
    task: &str,
    icl_num: usize,
    workflow: Option<&str>,
) -> InitialPrompt {
    let task = match workflow {
        Some(w) => format!("{task}\n\n{}", workflow_block(w)),
        None => task.to_string(),
    };
    let selected = &examples[..icl_num.min(examples.len())];

    let rendered: Vec<String> = selected
        .iter()
        .map(|transcript| {
            transcript
                .iter()
                .map(|turn| turn.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    let task_turn = format!("{TASK_HEADER}\n{task}");
    let observation = format!(
        "{instruction}{SECTION_SEPARATOR}{EXAMPLE_HEADER}\n{}{SECTION_SEPARATOR}{task_turn}",
        rendered.join("\n\n")
    );

    let mut messages = vec![ChatMessage::system(instruction)];
    for transcript in selected {
        for (i, turn) in transcript.iter().enumerate() {
            if i == 0 && turn.role == Role::User {
                messages.push(ChatMessage::user(format!("{EXAMPLE_HEADER}\n{}", turn.content)));
            } else {
                messages.push(turn.clone());
            }
        }
    }
    messages.push(ChatMessage::user(task_turn));

    InitialPrompt {
        observation,
        messages,
    }
}

/// The hint paragraph appended to the query or to an observation turn.
pub fn workflow_block(workflow: &str) -> String {
    format!("{WORKFLOW_INTRO}\n{workflow}")
}

/// The assistant prefix the agent continues from in thought mode.
pub fn thought_prefix(workflow: &str) -> String {
    format!("{WORKFLOW_THOUGHT_INTRO}\n{workflow}\n{THOUGHT_MARKER}")
}

// ---------------------------------------------------------------------------
// Built-in assets
// ---------------------------------------------------------------------------

fn transcript(turns: &[(Role, &str)]) -> Transcript {
    turns
        .iter()
        .map(|(role, content)| ChatMessage::new(*role, *content))
        .collect()
}

const ALFWORLD_INSTRUCTION: &str = "Interact with a household to solve a task. Imagine you are an intelligent agent in a household environment and your target is to perform actions to complete the task goal. At the beginning of your interactions, you will be given the detailed description of the current environment and your goal to accomplish.
For each of your turn, you will be given the observation of the last turn. You should first think about the current condition and plan for your future actions, and then output your action in this turn. Your output must strictly follow this format:\"Thought: your thoughts.\\nAction: your next action\".

The available actions are:
1. go to {recep}
2. take {obj} from {recep}
3. put {obj} in/on {recep}
4. open {recep}
5. close {recep}
6. toggle {obj} {recep}
7. clean {obj} with {recep}
8. heat {obj} with {recep}
9. cool {obj} with {recep}
where {obj} and {recep} correspond to objects and receptacles.
After your each turn, the environment will give you immediate feedback based on which you plan your next few steps. if the envrionment output \"Nothing happened\", that means the previous action is invalid and you should try more options.

Reminder:
1. The action must be chosen from the given available actions. Any actions except provided available actions will be regarded as illegal.
2. Think when necessary, try to act directly more in the process.";

fn builtin_alfworld() -> PromptAssets {
    use Role::{Assistant as A, User as U};

    let mut by_category = HashMap::new();
    by_category.insert(
        "put".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a cabinet 1, a countertop 1, a garbagecan 1, and a sinkbasin 1.\nYour task is to: put some spraybottle on toilet."),
            (A, "Thought: I need a spraybottle first. A cabinet is a likely place.\nAction: go to cabinet 1"),
            (U, "Observation: On the cabinet 1, you see a spraybottle 2."),
            (A, "Action: take spraybottle 2 from cabinet 1"),
            (U, "Observation: You pick up the spraybottle 2 from the cabinet 1."),
            (A, "Action: go to toilet 1"),
            (U, "Observation: On the toilet 1, you see a soapbar 1."),
            (A, "Action: put spraybottle 2 in/on toilet 1"),
        ])],
    );
    by_category.insert(
        "clean".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a countertop 1, a fridge 1, a sinkbasin 1, and a shelf 1.\nYour task is to: put a clean mug in shelf."),
            (A, "Thought: First find a mug, clean it at the sinkbasin, then put it on the shelf.\nAction: go to countertop 1"),
            (U, "Observation: On the countertop 1, you see a mug 1."),
            (A, "Action: take mug 1 from countertop 1"),
            (U, "Observation: You pick up the mug 1 from the countertop 1."),
            (A, "Action: go to sinkbasin 1"),
            (U, "Observation: On the sinkbasin 1, you see nothing."),
            (A, "Action: clean mug 1 with sinkbasin 1"),
            (U, "Observation: You clean the mug 1 using the sinkbasin 1."),
            (A, "Action: go to shelf 1"),
            (U, "Observation: On the shelf 1, you see nothing."),
            (A, "Action: put mug 1 in/on shelf 1"),
        ])],
    );
    by_category.insert(
        "heat".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a countertop 1, a fridge 1, and a microwave 1.\nYour task is to: heat some potato and put it in countertop."),
            (A, "Thought: Potatoes are often kept in the fridge.\nAction: go to fridge 1"),
            (U, "Observation: The fridge 1 is closed."),
            (A, "Action: open fridge 1"),
            (U, "Observation: You open the fridge 1. The fridge 1 is open. In it, you see a potato 1."),
            (A, "Action: take potato 1 from fridge 1"),
            (U, "Observation: You pick up the potato 1 from the fridge 1."),
            (A, "Action: go to microwave 1"),
            (U, "Observation: The microwave 1 is closed."),
            (A, "Action: heat potato 1 with microwave 1"),
            (U, "Observation: You heat the potato 1 using the microwave 1."),
            (A, "Action: go to countertop 1"),
            (U, "Observation: On the countertop 1, you see nothing."),
            (A, "Action: put potato 1 in/on countertop 1"),
        ])],
    );
    by_category.insert(
        "cool".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a countertop 1, a fridge 1, and a shelf 1.\nYour task is to: cool some apple and put it in shelf."),
            (A, "Action: go to countertop 1"),
            (U, "Observation: On the countertop 1, you see an apple 1."),
            (A, "Action: take apple 1 from countertop 1"),
            (U, "Observation: You pick up the apple 1 from the countertop 1."),
            (A, "Action: go to fridge 1"),
            (U, "Observation: The fridge 1 is closed."),
            (A, "Action: cool apple 1 with fridge 1"),
            (U, "Observation: You cool the apple 1 using the fridge 1."),
            (A, "Action: go to shelf 1"),
            (U, "Observation: On the shelf 1, you see nothing."),
            (A, "Action: put apple 1 in/on shelf 1"),
        ])],
    );
    by_category.insert(
        "examine".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a desk 1, a drawer 1, and a sidetable 1.\nYour task is to: look at bowl under the desklamp."),
            (A, "Thought: Find the bowl, then use the desklamp.\nAction: go to drawer 1"),
            (U, "Observation: On the drawer 1, you see a bowl 1."),
            (A, "Action: take bowl 1 from drawer 1"),
            (U, "Observation: You pick up the bowl 1 from the drawer 1."),
            (A, "Action: go to sidetable 1"),
            (U, "Observation: On the sidetable 1, you see a desklamp 1."),
            (A, "Action: use desklamp 1"),
        ])],
    );
    by_category.insert(
        "puttwo".to_string(),
        vec![transcript(&[
            (U, "You are in the middle of a room. Looking quickly around you, you see a cabinet 1, a countertop 1, and a drawer 1.\nYour task is to: put two cellphone in drawer."),
            (A, "Thought: I need two cellphones, one at a time.\nAction: go to countertop 1"),
            (U, "Observation: On the countertop 1, you see a cellphone 1, and a cellphone 2."),
            (A, "Action: take cellphone 1 from countertop 1"),
            (U, "Observation: You pick up the cellphone 1 from the countertop 1."),
            (A, "Action: go to drawer 1"),
            (U, "Observation: The drawer 1 is open. In it, you see nothing."),
            (A, "Action: put cellphone 1 in/on drawer 1"),
            (U, "Observation: You put the cellphone 1 in/on the drawer 1."),
            (A, "Action: go to countertop 1"),
            (U, "Observation: On the countertop 1, you see a cellphone 2."),
            (A, "Action: take cellphone 2 from countertop 1"),
            (U, "Observation: You pick up the cellphone 2 from the countertop 1."),
            (A, "Action: go to drawer 1"),
            (U, "Observation: The drawer 1 is open. In it, you see a cellphone 1."),
            (A, "Action: put cellphone 2 in/on drawer 1"),
        ])],
    );

    PromptAssets {
        instruction: ALFWORLD_INSTRUCTION.to_string(),
        examples: ExampleSet::ByCategory(by_category),
    }
}

const SCIWORLD_INSTRUCTION: &str = "You are a helpful assistant to do some scientific experiment in an environment.
In the environment, there are several rooms: kitchen, foundry, workshop, bathroom, outside, living room, bedroom, greenhouse, art studio, hallway.
You should explore the environment and find the items you need to complete the experiment.
You can teleport to any room in one step.
All containers in the environment have already been opened, you can directly get items from the containers.

The available actions are:
    open OBJ: open a container
    close OBJ: close a container
    activate OBJ: activate a device
    deactivate OBJ: deactivate a device
    connect OBJ to OBJ: connect electrical components
    disconnect OBJ: disconnect electrical components
    use OBJ [on OBJ]: use a device/item
    look around: describe the current room
    examine OBJ: describe an object in detail
    look at OBJ: describe a container's contents
    read OBJ: read a note or book
    move OBJ to OBJ: move an object to a container
    pick up OBJ: move an object to the inventory
    pour OBJ into OBJ: pour a liquid into a container
    mix OBJ: chemically mix a container
    teleport to LOC: teleport to a specific room
    focus on OBJ: signal intent on a task object
    wait: task no action for 10 steps
    wait1: task no action for a step

Your response should use the following format:

Thought: <your thoughts>
Action: <your next action>";

fn builtin_sciworld() -> PromptAssets {
    use Role::{Assistant as A, User as U};

    PromptAssets {
        instruction: SCIWORLD_INSTRUCTION.to_string(),
        examples: ExampleSet::Shared(vec![transcript(&[
            (U, "Task Description:\nYour task is to find a(n) living thing. First, focus on the thing. Then, move it to the purple box in the workshop."),
            (A, "Thought: Living things such as plants grow in the greenhouse.\nAction: teleport to greenhouse"),
            (U, "Observation: You teleport to the greenhouse."),
            (A, "Action: look around"),
            (U, "Observation: This room is called the greenhouse. In it, you see: a flower pot 1 (containing a peach seed)."),
            (A, "Action: focus on peach seed"),
            (U, "Observation: You focus on the peach seed."),
            (A, "Action: pick up flower pot 1"),
            (U, "Observation: You move the flower pot 1 to the inventory."),
            (A, "Action: teleport to workshop"),
            (U, "Observation: You teleport to the workshop."),
            (A, "Action: move flower pot 1 to purple box"),
        ])]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Vec<Transcript> {
        vec![transcript(&[
            (Role::User, "Your task is to: put a mug on the desk."),
            (Role::Assistant, "Action: go to desk 1"),
        ])]
    }

    #[test]
    fn test_flattened_prompt_has_three_sections() {
        let prompt = prompt_with_icl("INSTR", &example(), "Your task is to: heat an egg.", 1, None);
        let parts: Vec<&str> = prompt.observation.split(SECTION_SEPARATOR).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "INSTR");
        assert!(parts[1].contains("go to desk 1"));
        assert!(parts[2].ends_with("Your task is to: heat an egg."));
    }

    #[test]
    fn test_conversation_prompt_alternates_after_system() {
        let prompt = prompt_with_icl("INSTR", &example(), "task", 1, None);
        let roles: Vec<Role> = prompt.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert!(prompt.messages[1].content.starts_with(EXAMPLE_HEADER));
    }

    #[test]
    fn test_query_workflow_is_spliced_into_task() {
        let prompt = prompt_with_icl("I", &example(), "task", 1, Some("Step 1: look"));
        assert!(prompt
            .observation
            .ends_with("task\n\nThis workflow maybe helpful for you to complete the task:\nStep 1: look"));
        assert!(prompt.messages.last().unwrap().content.contains("Step 1: look"));
    }

    #[test]
    fn test_icl_num_limits_examples() {
        let mut examples = example();
        examples.push(transcript(&[(Role::User, "second example")]));
        let prompt = prompt_with_icl("I", &examples, "t", 1, None);
        assert!(!prompt.observation.contains("second example"));
        let prompt = prompt_with_icl("I", &examples, "t", 5, None);
        assert!(prompt.observation.contains("second example"));
    }

    #[test]
    fn test_thought_prefix_ends_with_marker() {
        let prefix = thought_prefix("Step 1: go");
        assert!(prefix.starts_with(WORKFLOW_THOUGHT_INTRO));
        assert!(prefix.ends_with("Step 1: go\nThought: "));
    }

    #[test]
    fn test_builtin_assets_cover_every_category() {
        let assets = PromptAssets::builtin(EnvKind::Alfworld);
        for key in ["put", "clean", "heat", "cool", "examine", "puttwo"] {
            assert!(!assets.examples_for(Some(key)).unwrap().is_empty(), "{key}");
        }
        assert!(assets.examples_for(Some("juggle")).is_err());

        let sci = PromptAssets::builtin(EnvKind::Sciworld);
        assert_eq!(sci.examples_for(None).unwrap().len(), 1);
    }

    #[test]
    fn test_assets_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icl.json");
        std::fs::write(
            &path,
            r#"{"instruction":"Do it.","examples":[[{"role":"user","content":"x"},{"role":"assistant","content":"Action: y"}]]}"#,
        )
        .unwrap();
        let assets = PromptAssets::load_from_file(&path).unwrap();
        assert_eq!(assets.instruction, "Do it.");
        assert_eq!(assets.examples_for(Some("anything")).unwrap()[0].len(), 2);
    }
}
