//! Prompts sent to planning agents.

// =============================================================================
// Goal decomposition
// =============================================================================

/// Instructions for turning a goal into a task list.
pub const PLANNING_PROMPT: &str = r#"You are a planning assistant. Break the goal below into a short sequence of concrete tasks that can each be handed to a single worker.

Return a JSON array. Each element must have:
- "name": short snake_case identifier
- "description": one sentence describing the work
- "inputs": names of the data the task needs
- "outputs": names of the data the task produces

Return ONLY the JSON array, with no explanation before or after it."#;

/// Worked examples appended to [`PLANNING_PROMPT`] when enabled.
pub const PLANNING_EXAMPLES: &str = r#"Example goal: Write a blog post about home composting
Example plan:
[
  {"name": "research_topic", "description": "Collect key facts about home composting", "inputs": ["topic"], "outputs": ["facts"]},
  {"name": "draft_post", "description": "Write a first draft from the collected facts", "inputs": ["facts"], "outputs": ["draft"]},
  {"name": "edit_post", "description": "Tighten the draft and fix errors", "inputs": ["draft"], "outputs": ["post"]}
]

Example goal: Compare three laptops for a student budget
Example plan:
[
  {"name": "shortlist_models", "description": "Pick three laptops within the budget", "inputs": ["budget"], "outputs": ["models"]},
  {"name": "compare_specs", "description": "Tabulate specs and prices for each model", "inputs": ["models"], "outputs": ["comparison"]},
  {"name": "recommend", "description": "Recommend one model with reasons", "inputs": ["comparison"], "outputs": ["recommendation"]}
]"#;

// =============================================================================
// Re-planning
// =============================================================================

/// Instructions for proposing alternatives to a failed task.
pub const REPLANNING_PROMPT: &str = r#"A task in a larger plan has failed. Propose one or more alternative tasks that reach the same outcome another way.

Return a JSON array using the same task format: "name", "description", "inputs", "outputs".
Return ONLY the JSON array."#;

/// Prompt for [`super::Planner::plan_from_goal`].
pub fn goal_prompt(goal: &str, include_examples: bool) -> String {
    let mut prompt = String::from(PLANNING_PROMPT);
    if include_examples {
        prompt.push_str("\n\n");
        prompt.push_str(PLANNING_EXAMPLES);
    }
    prompt.push_str("\n\nGoal: ");
    prompt.push_str(goal);
    prompt
}

/// Prompt for [`super::Planner::replan_failed_job`].
pub fn replan_prompt(title: &str, goal: &str, error: &str) -> String {
    format!("{REPLANNING_PROMPT}\n\nFailed task: {title}\nTask goal: {goal}\nError: {error}")
}
