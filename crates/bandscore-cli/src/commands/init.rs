//! The `bandscore init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("bandscore.toml").exists() {
        println!("bandscore.toml already exists, skipping.");
    } else {
        std::fs::write("bandscore.toml", SAMPLE_CONFIG)?;
        println!("Created bandscore.toml");
    }

    std::fs::create_dir_all("tests")?;
    let example_path = std::path::Path::new("tests/example.toml");
    if example_path.exists() {
        println!("tests/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_TEST)?;
        println!("Created tests/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit bandscore.toml with your API keys");
    println!("  2. Run: bandscore validate --tests tests/example.toml");
    println!("  3. Run: bandscore start --tests tests/example.toml --test-id example --user me");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# bandscore configuration

evaluation_provider = "anthropic"
evaluation_model = "claude-sonnet-4-20250514"
transcription_provider = "openai"
transcription_model = "whisper-1"
temperature = 0.0

# "require-all-scored" keeps a module open until it is scored;
# "allow-partial" moves on and marks the result partial.
completion_policy = "require-all-scored"
max_evaluation_attempts = 3
attempt_ttl_hours = 168
store_dir = "./bandscore-data"

[providers.anthropic]
type = "anthropic"
api_key = "${ANTHROPIC_API_KEY}"

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

# Offline stand-in: set both providers above to "offline" to try the flow
# without API keys.
[providers.offline]
type = "mock"
"#;

const EXAMPLE_TEST: &str = r#"[test]
id = "example"
name = "Example Academic Test"
description = "A short test covering all four modules"

[listening.answers]
q1 = "library"
q2 = ["colour", "color"]
q3 = "tuesday"
q4 = "b"

[reading.answers]
q1 = "true"
q2 = "false"
q3 = "not given"
q4 = "photosynthesis"

[[writing.tasks]]
id = "task1"
prompt = """
The chart shows the number of visitors to three museums between 2010 and 2020.
Summarise the information by selecting and reporting the main features.
"""
min_words = 150

[[writing.tasks]]
id = "task2"
prompt = """
Some people believe that university education should be free for everyone.
Discuss both views and give your own opinion.
"""
min_words = 250

[[speaking.parts]]
id = "part1"
prompt = "Tell me about the place where you grew up."

[[speaking.parts]]
id = "part2"
prompt = "Describe a book you enjoyed reading. Say what it was about and why you liked it."
"#;
