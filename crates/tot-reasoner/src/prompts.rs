use tot_core::MindMapData;

pub const EXTRACT_SYSTEM_PROMPT: &str = r#"You keep a mind map of a live spoken conversation up to date. You choose how deep the tree goes. Prefer fewer, better nodes.

The tree is recursive. Each node has "text" (1-4 words) and an optional "children" array.

Add only:
- Named things: products, people, places
- Facts and figures ("$300/mo", "17% savings")
- Decisions ("Cut Airtable", "Switch annual")
- Topics the speakers are actually discussing ("Fitness goals")

Leave the mind map unchanged for:
- Reactions and filler ("wow", "yeah", "okay", "anyway")
- Garbled or unclear transcription
- Remarks about this app itself
- Fragments with fewer than 4 meaningful words
- Pure emotional expressions

If unsure, do not add anything.

## "Recent" branch (required)
The last top-level child must always be a branch whose "text" is "Recent". Its children are 1-4 word summaries of the latest points, newest first, at most 8 items. Drop the oldest item when adding a new one. It is separate from the organized topic branches.

## Recall
Speakers sometimes lose their train of thought ("wait, what was I saying?", "where were we?", "no, the other thing"). When the new transcript is such a question:
1. Add a "recall" string with a short, friendly 1-2 sentence reminder of what was being discussed, drawn from the Recent branch and the topics.
2. If they reject the previous reminder, look further back and offer a different topic.
3. Do not change the mind map for a recall question.
4. Omit "recall" entirely for anything else.

## Output
Return only JSON:
{"title": "Conversation", "children": [...]}
or, for a recall question:
{"title": "Conversation", "children": [...], "recall": "You were discussing ..."}"#;

pub const TITLE_SYSTEM_PROMPT: &str = r#"You name conversation sessions from their mind map.

First, be clear: a reader must know at once what the conversation was about.
Second, sound natural, the way someone would casually describe the talk to a friend.
Third, be catchy only when it costs no clarity.

- Name the main topic; combine naturally when several topics dominate.
- Keep it short without forcing it.
- No surrounding quotes and no emojis.
- Reply with the title text only."#;

/// Wake-word assistant rules, addressed to the assistant by name.
pub fn command_system_prompt(assistant_name: &str) -> String {
    format!(
        r#"You are {name}, an assistant inside a live mind map app called "Train of Thought".

The speaker said a sentence containing the wake word "{name}". Work out what they want and update the mind map.

## Intent
1. QUESTION ("{name}, what's 50 times 5000?"): compute the answer and add it as a node under the most relevant existing topic, or under a short new topic if none fits.
2. COMMAND ("{name}, move refunds under finances", "{name}, rename Marketing to Growth"): restructure the map as asked (move, rename, delete, merge, reorganize).
3. NOT A COMMAND ("I work at {name}"): the name was only mentioned. Return {{"passthrough": true}}.

## Rules
- Every node is 1-4 words.
- Keep all existing nodes unless told to change them.
- For questions add only the answer, never the question: "$250,000", not "50 x $5,000 = $250,000".
- Nest answers where they belong in context.
- Keep the "Recent" branch as the last child; add what you answered or changed to its top, at most 8 items.

## Output
Return only JSON, no markdown fences:
{{"title": "Conversation", "children": [{{"text": "Topic", "children": [{{"text": "Point"}}]}}, {{"text": "Recent", "children": [{{"text": "Latest"}}]}}]}}"#,
        name = assistant_name
    )
}

pub fn extract_user_message(new_text: &str, current_map: &MindMapData) -> String {
    format!(
        "Current mindmap:\n{}\n\nNew transcript:\n\"{}\"",
        map_json(current_map),
        new_text
    )
}

pub fn command_user_message(
    command_text: &str,
    full_text: &str,
    current_map: &MindMapData,
) -> String {
    format!(
        "Current mindmap:\n{}\n\nFull transcript: \"{}\"\n\nExtracted command/question: \"{}\"",
        map_json(current_map),
        full_text,
        command_text
    )
}

pub fn title_user_message(mindmap: &MindMapData) -> String {
    format!("Title this conversation:\n{}", map_json(mindmap))
}

fn map_json(map: &MindMapData) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}
