//! Prompt construction for the expansion oracle, the generator CLI, and the
//! production-readiness review. Pure string assembly, no I/O.

use crate::spec::PluginSpecification;

/// File inside the working copy holding the detailed specification.
pub const DETAILED_SPEC_FILE: &str = "PLUGIN_SPEC.md";

/// Domain constraints embedded in every expansion prompt.
const DOMAIN_CONSTRAINTS: &[&str] = &[
    "All external API usage must go through the host runtime's abstraction layer, never a concrete backend.",
    "Secrets and API keys are read from runtime settings, never hardcoded or read from process env directly.",
    "Every action, provider, evaluator, and service must be registered in the plugin's export object.",
    "All handlers must validate their inputs and return structured errors instead of throwing raw exceptions.",
    "The plugin must build cleanly and ship unit tests for each handler.",
];

fn push_named_list(buf: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    buf.push_str(&format!("\n{label}:\n"));
    for item in items {
        buf.push_str(&format!("- {item}\n"));
    }
}

/// Prompt for the one-shot specification expansion call.
///
/// The oracle's free-form prose answer becomes the detailed specification
/// written to [`DETAILED_SPEC_FILE`].
pub fn expansion_prompt(spec: &PluginSpecification) -> String {
    let mut buf = String::new();
    buf.push_str(
        "You are a senior plugin architect. Expand the following terse plugin \
         specification into a detailed technical document that a coding agent \
         can implement without further clarification. Cover the public \
         surface, data flow, error handling, and test plan.\n",
    );
    buf.push_str(&format!("\nPlugin name: {}\n", spec.name));
    buf.push_str(&format!("Description: {}\n", spec.description));
    push_named_list(&mut buf, "Features", &spec.features);
    push_named_list(&mut buf, "Actions", &spec.actions);
    push_named_list(&mut buf, "Providers", &spec.providers);
    push_named_list(&mut buf, "Evaluators", &spec.evaluators);
    push_named_list(&mut buf, "Services", &spec.services);
    buf.push_str("\nHard constraints (restate these in the document):\n");
    for constraint in DOMAIN_CONSTRAINTS {
        buf.push_str(&format!("- {constraint}\n"));
    }
    buf
}

/// Initial instruction for the generator CLI, pointing it at the detailed
/// specification inside the working copy.
pub fn initial_instruction(spec: &PluginSpecification) -> String {
    format!(
        "Implement the {name} plugin in this directory by following \
         {spec_file} exactly. The scaffold is already in place; fill in the \
         implementation, wire up all exports, and add unit tests. Do not \
         change the package name or the build/test configuration.",
        name = spec.name,
        spec_file = DETAILED_SPEC_FILE,
    )
}

/// Regeneration instruction carrying build or test diagnostics.
pub fn fix_instruction(phase: &str, diagnostics: &str) -> String {
    format!(
        "The {phase} step failed for the plugin in this directory. Fix the \
         issues below, keeping {DETAILED_SPEC_FILE} as the source of truth, \
         then make sure the {phase} step passes.\n\n{diagnostics}"
    )
}

/// Regeneration instruction carrying reviewer revision instructions.
pub fn revision_instruction(instructions: &str) -> String {
    format!(
        "A production-readiness review of this plugin requested changes. \
         Apply the revisions below without regressing existing behavior, \
         keeping {DETAILED_SPEC_FILE} as the source of truth.\n\n{instructions}"
    )
}

/// Prompt for the production-readiness review, embedding the full source
/// listing and the evaluation rubric.
pub fn readiness_prompt(source_listing: &str) -> String {
    format!(
        "You are reviewing a runtime plugin for production readiness. \
         Evaluate the source files below against this rubric: correctness \
         against PLUGIN_SPEC.md, error handling on every external call, no \
         hardcoded secrets, all declared actions/providers/evaluators/services \
         registered and tested, and no placeholder or stubbed logic.\n\n\
         Respond with exactly one JSON object: \
         {{\"production_ready\": boolean, \"revision_instructions\": string}}. \
         Set revision_instructions only when production_ready is false.\n\n\
         {source_listing}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PluginSpecification {
        PluginSpecification {
            name: "weather".to_owned(),
            description: "Fetches weather data.".to_owned(),
            features: vec!["5-day forecast".to_owned()],
            actions: vec!["GET_WEATHER".to_owned()],
            providers: vec!["weatherProvider".to_owned()],
            evaluators: Vec::new(),
            services: Vec::new(),
        }
    }

    #[test]
    fn expansion_prompt_embeds_spec_and_constraints() {
        let prompt = expansion_prompt(&spec());
        assert!(prompt.contains("Plugin name: weather"));
        assert!(prompt.contains("- 5-day forecast"));
        assert!(prompt.contains("- GET_WEATHER"));
        assert!(prompt.contains("abstraction layer"));
        // Empty sections are omitted entirely.
        assert!(!prompt.contains("Evaluators:"));
    }

    #[test]
    fn fix_instruction_carries_diagnostics() {
        let instruction = fix_instruction("build", "error TS2304: Cannot find name 'foo'.");
        assert!(instruction.contains("build step failed"));
        assert!(instruction.contains("TS2304"));
        assert!(instruction.contains(DETAILED_SPEC_FILE));
    }

    #[test]
    fn readiness_prompt_demands_a_single_json_object() {
        let prompt = readiness_prompt("--- src/index.ts ---\nexport default {};");
        assert!(prompt.contains(r#"{"production_ready": boolean"#));
        assert!(prompt.contains("src/index.ts"));
    }
}
