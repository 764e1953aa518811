//! A conversation with the AI financial advisor.

use crate::api::Advisor;
use crate::model::Message;
use std::sync::Arc;
use tracing::{debug, error};

/// Appended in place of a reply when the advisor model fails.
pub const APOLOGY: &str = "Lo siento, algo salió mal. Por favor, inténtalo de nuevo.";

const PERSONA: &str = r#"Eres "LiftUp AI", un asesor financiero amigable, experto y paciente para
microemprendedores, nuevos empresarios y estudiantes en México y Latinoamérica.

Instrucciones:
1. Usa lenguaje sencillo. Explica conceptos como "punto de equilibrio", "flujo de caja" o "margen
   de ganancia" con ejemplos cotidianos: una tienda de barrio, un puesto de tacos, un diseñador
   freelance.
2. Sé alentador y empático. Eres un coach, no un contador estricto.
3. Responde para el contexto de México y LATAM: informalidad, acceso limitado a capital y la
   cultura de negocios de la región.
4. Da consejos prácticos y accionables.
5. Nunca pidas información financiera personal o sensible. Si la pregunta depende de datos
   privados, explica cómo puede hacer el cálculo por su cuenta.
6. No des consejos de inversión. Si te preguntan dónde invertir, declina y explica que tu papel
   es ayudar con la gestión del negocio.

Considera el historial de la conversación para dar respuestas coherentes."#;

/// Builds the prompt sent for `question`.
pub fn prompt(question: &str) -> String {
    format!("{PERSONA}\n\nPregunta del usuario: \"{question}\"")
}

/// Keeps the history of a conversation and sends each new question with the turns that came
/// before it.
pub struct FinancialAdvisor {
    advisor: Arc<dyn Advisor>,
    messages: Vec<Message>,
}

impl FinancialAdvisor {
    pub fn new(advisor: Arc<dyn Advisor>) -> Self {
        Self {
            advisor,
            messages: Vec::new(),
        }
    }

    /// The conversation so far, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Asks `question` and returns the advisor's reply, or the apology if the model failed.
    /// Blank questions are ignored and return `None`.
    pub async fn ask(&mut self, question: &str) -> Option<&Message> {
        if question.trim().is_empty() {
            return None;
        }
        let history = self.messages.clone();
        self.messages.push(Message::user(question));

        let reply = match self.advisor.generate(&prompt(question), &history).await {
            Ok(text) => {
                debug!("The advisor replied with {} characters", text.len());
                Message::model(text)
            }
            Err(e) => {
                error!("Error contacting the advisor: {e:#}");
                Message::model(APOLOGY)
            }
        };
        self.messages.push(reply);
        self.messages.last()
    }

    /// Forgets the conversation.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedAdvisor;
    use crate::model::Role;

    #[tokio::test]
    async fn test_conversation_history() {
        let scripted = ScriptedAdvisor::new().reply("Es el dinero que entra y sale.").reply("Sí.");
        let mut advisor = FinancialAdvisor::new(Arc::new(scripted.clone()));

        let first = advisor.ask("¿Qué es el flujo de caja?").await.unwrap();
        assert_eq!(first.role(), Role::Model);
        assert_eq!(first.text(), "Es el dinero que entra y sale.");
        advisor.ask("¿Es importante?").await.unwrap();

        let roles: Vec<Role> = advisor.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);

        let prompts = scripted.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].0.contains("LiftUp AI"));
        assert!(prompts[0].0.ends_with("Pregunta del usuario: \"¿Qué es el flujo de caja?\""));
        assert!(prompts[0].1.is_empty());
        assert_eq!(prompts[1].1.len(), 2);
        assert_eq!(prompts[1].1[1].text(), "Es el dinero que entra y sale.");
    }

    #[tokio::test]
    async fn test_blank_question_is_ignored() {
        let scripted = ScriptedAdvisor::new();
        let mut advisor = FinancialAdvisor::new(Arc::new(scripted.clone()));
        assert!(advisor.ask("   ").await.is_none());
        assert!(advisor.messages().is_empty());
        assert!(scripted.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_failure_appends_apology() {
        let scripted = ScriptedAdvisor::new().fail("quota exceeded");
        let mut advisor = FinancialAdvisor::new(Arc::new(scripted));
        let reply = advisor.ask("hola").await.unwrap();
        assert_eq!(reply.text(), APOLOGY);
        assert_eq!(advisor.messages().len(), 2);

        advisor.clear();
        assert!(advisor.messages().is_empty());
    }
}
