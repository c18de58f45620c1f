use std::collections::BTreeMap;
use std::fmt::Write;

use crate::config::StoreConfig;

/// Assembles the system instruction sent with every generation call.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    store: StoreConfig,
}

impl PromptBuilder {
    pub fn new(store: StoreConfig) -> Self {
        Self { store }
    }

    pub fn system_prompt(&self, parameters: &BTreeMap<&str, String>, context: Option<&str>) -> String {
        let mut prompt = format!(
            "Eres un asistente de ventas experto para {}. Responde de forma breve y clara.\n",
            self.store.name
        );

        let facts = self.store.facts.trim();
        if !facts.is_empty() {
            let _ = write!(prompt, "\nInformación clave de {}:\n{}\n", self.store.name, facts);
        }

        if !self.store.instructions.is_empty() {
            prompt.push_str("\nInstrucciones:\n");
            for (i, instruction) in self.store.instructions.iter().enumerate() {
                let _ = writeln!(prompt, "{}. {}", i + 1, instruction.trim());
            }
        }

        if !parameters.is_empty() {
            prompt.push_str("\nParámetros detectados:\n");
            for (name, value) in parameters {
                let _ = writeln!(prompt, "- {}: {}", name, value);
            }
        }

        if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
            let _ = write!(prompt, "\nContexto adicional: {}\n", context);
        }

        prompt.trim_end().to_string()
    }
}
