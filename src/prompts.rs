//! Prompt text for every model call.
//!
//! Classifier and pipeline prompts are built with `format!`. The two answer templates are
//! minijinja templates (`{{ question }}`) so operators can replace them from
//! `PROMPT_TEMPLATE_DIR`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use thiserror::Error;

use crate::types::Language;

/// Model output that the extraction prompt is told to emit when nothing matches.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";

const ANSWER_TEMPLATE_EN: &str = "{{ system_message }}\n\nContext:\n{{ context }}\n\n{{ chat_history }}Question: {{ question }}\nAnswer:";

const ANSWER_TEMPLATE_ES: &str = "{{ system_message }}\n\nContexto:\n{{ context }}\n\n{{ chat_history }}Pregunta: {{ question }}\nRespuesta:";

/// Template loading and rendering failures.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Template names a variable with no value supplied.
    #[error("unknown template variable {0}")]
    UnknownVariable(String),
    /// Template failed to parse or render.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
    /// Answer template never uses `question`.
    #[error("template {0} does not reference question")]
    MissingQuestion(String),
    /// Template file could not be read.
    #[error("failed to read template {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// Variables referenced by `template`.
pub fn template_variables(template: &str) -> Result<HashSet<String>, PromptError> {
    let env = environment();
    let compiled = env.template_from_str(template)?;
    Ok(compiled.undeclared_variables(false))
}

/// Render `template` with `vars`. Every variable the template names must be supplied.
pub fn render(template: &str, vars: &HashMap<&str, &str>) -> Result<String, PromptError> {
    let env = environment();
    let compiled = env.template_from_str(template)?;
    let unknown = compiled
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !vars.contains_key(name.as_str()))
        .min();
    if let Some(name) = unknown {
        return Err(PromptError::UnknownVariable(name));
    }
    Ok(compiled.render(vars)?)
}

/// Answer templates, built in or loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLibrary {
    answer_en: String,
    answer_es: String,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// Built-in templates.
    pub fn builtin() -> Self {
        Self {
            answer_en: ANSWER_TEMPLATE_EN.to_string(),
            answer_es: ANSWER_TEMPLATE_ES.to_string(),
        }
    }

    /// Built-in templates with `answer_en.txt`/`answer_es.txt` from `dir` taking precedence.
    pub fn load(dir: &Path) -> Result<Self, PromptError> {
        let mut library = Self::builtin();
        if let Some(template) = read_override(dir, "answer_en.txt")? {
            library.answer_en = template;
        }
        if let Some(template) = read_override(dir, "answer_es.txt")? {
            library.answer_es = template;
        }
        Ok(library)
    }

    /// Library with explicit templates; used by tests and embedding applications.
    pub fn with_templates(answer_en: impl Into<String>, answer_es: impl Into<String>) -> Self {
        Self {
            answer_en: answer_en.into(),
            answer_es: answer_es.into(),
        }
    }

    /// Answer template for `language`.
    pub fn answer_template(&self, language: Language) -> &str {
        match language {
            Language::English => &self.answer_en,
            Language::Spanish => &self.answer_es,
        }
    }

    /// Render the answer template for `language`.
    pub fn render_answer(
        &self,
        language: Language,
        system_message: &str,
        context: &str,
        chat_history: &str,
        question: &str,
    ) -> Result<String, PromptError> {
        let template = self.answer_template(language);
        if !template_variables(template)?.contains("question") {
            return Err(PromptError::MissingQuestion(format!("answer_{}", language.as_str())));
        }
        let vars = HashMap::from([
            ("system_message", system_message),
            ("context", context),
            ("chat_history", chat_history),
            ("question", question),
        ]);
        render(template, &vars)
    }
}

fn read_override(dir: &Path, name: &str) -> Result<Option<String>, PromptError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    let template = std::fs::read_to_string(&path).map_err(|source| PromptError::Io {
        path: path.clone(),
        source,
    })?;
    tracing::info!(path = %path.display(), "Loaded answer template override");
    Ok(Some(template))
}

/// Assistant persona for grounded answers.
pub fn persona(language: Language) -> &'static str {
    match language {
        Language::English => {
            "You are a kind immigration law assistant. Answer only from the provided context and \
             do not invent information. If the context does not answer the question, say that you \
             do not have enough information. You are not a lawyer and do not give legal advice.\n\
             IMPORTANT: cite the context sources you use with their number in square brackets, \
             like [1]. Leave out sources that are not relevant."
        }
        Language::Spanish => {
            "Eres un asistente amable especializado en leyes de inmigración. Responde únicamente \
             con base en el contexto proporcionado y no inventes información. Si el contexto no \
             responde la pregunta, indica que no tienes información suficiente. No eres abogado y \
             no das asesoría legal.\n\
             IMPORTANTE: cita las fuentes del contexto que uses con su número entre corchetes, \
             así: [1]. Omite las fuentes que no sean relevantes."
        }
    }
}

/// Persona for answers grounded in an uploaded document.
pub fn document_persona(language: Language) -> &'static str {
    match language {
        Language::English => {
            "You are an expert document analysis assistant. The user uploaded a document and has a \
             question or task about it. Answer based solely on the document content below. If the \
             information is not in the document, say so clearly. Give a clear, accurate and \
             well-structured response."
        }
        Language::Spanish => {
            "Eres un asistente experto en análisis de documentos. El usuario subió un documento y \
             tiene una pregunta o tarea sobre él. Responde basándote únicamente en el contenido del \
             documento. Si la información no está en el documento, indícalo claramente. Da una \
             respuesta clara, precisa y bien estructurada."
        }
    }
}

/// Ask for five common and five uncommon questions about `content`.
pub fn question_generation(language: Language, content: &str) -> String {
    match language {
        Language::English => format!(
            "You are an immigration law content analyst. Generate questions that help a search \
             system find this content.\n\
             Read the content and write exactly 10 questions answerable from it: 5 COMMON \
             QUESTIONS most readers would ask and 5 UNCOMMON QUESTIONS that are more specific or \
             technical. Do not repeat questions, add explanations, or invent facts.\n\n\
             Content:\n{content}\n\n\
             Format your response as:\n\
             COMMON QUESTIONS:\n1. [question]\n2. [question]\n3. [question]\n4. [question]\n5. [question]\n\n\
             UNCOMMON QUESTIONS:\n1. [question]\n2. [question]\n3. [question]\n4. [question]\n5. [question]"
        ),
        Language::Spanish => format!(
            "Eres un analista de contenido especializado en derecho migratorio. Genera preguntas \
             que ayuden a un sistema de búsqueda a encontrar este contenido.\n\
             Lee el contenido y escribe exactamente 10 preguntas que puedan responderse con él: 5 \
             PREGUNTAS COMUNES que haría la mayoría de los lectores y 5 PREGUNTAS POCO COMUNES más \
             específicas o técnicas. No repitas preguntas, no agregues explicaciones y no inventes \
             datos.\n\n\
             Contenido:\n{content}\n\n\
             Formato de salida:\n\
             PREGUNTAS COMUNES:\n1. [pregunta]\n2. [pregunta]\n3. [pregunta]\n4. [pregunta]\n5. [pregunta]\n\n\
             PREGUNTAS POCO COMUNES:\n1. [pregunta]\n2. [pregunta]\n3. [pregunta]\n4. [pregunta]\n5. [pregunta]"
        ),
    }
}

/// Ask for the language of `text`.
pub fn language_detection(text: &str) -> String {
    format!(
        "Detect the language of this text. Respond with only \"english\" or \"spanish\".\n\
         Text: {text}\n\
         Language:"
    )
}

/// Ask whether a question needs the whole document or one part of it.
pub fn intent(language: Language, question: &str) -> String {
    match language {
        Language::English => format!(
            "You are an expert document analysis specialist. Decide whether the user question \
             needs an understanding of the entire document or only a small, specific part.\n\
             - A summary, main points, a rewrite, the overall theme, purpose or structure needs \
             the entire document: HOLISTIC.\n\
             - A specific detail, fact, name, date or definition needs only a targeted part: \
             SPECIFIC.\n\n\
             User Question: \"{question}\"\n\n\
             Respond with ONLY ONE word: HOLISTIC or SPECIFIC."
        ),
        Language::Spanish => format!(
            "Eres un especialista experto en análisis de documentos. Decide si la pregunta del \
             usuario requiere comprender el documento completo o solo una parte pequeña y \
             específica.\n\
             - Un resumen, los puntos principales, una reescritura, el tema general, el propósito \
             o la estructura requieren el documento completo: HOLÍSTICO.\n\
             - Un detalle, dato, nombre, fecha o definición concretos requieren solo una parte: \
             ESPECÍFICO.\n\n\
             Pregunta del usuario: \"{question}\"\n\n\
             Responde SOLO con una palabra: HOLÍSTICO o ESPECÍFICO."
        ),
    }
}

/// Ask whether a turn is about the uploaded document or the general knowledge base.
pub fn router(history: &str, query: &str) -> String {
    format!(
        "You are a master router for a conversational assistant. Classify the user's query into \
         one of two categories using the conversation history and the current query. The user may \
         be following up on a document they uploaded earlier.\n\n\
         Categories:\n\
         1. DOCUMENT_HANDLER: the query refers to the uploaded document's content, people, \
         organizations or other named entities in it, asks a follow-up about it, or asks for a \
         summary of it.\n\
         2. GENERAL_KNOWLEDGE_BASE: the query asks about a specific form or reference code (such \
         as I-589 or I-130), asks for a general legal definition, or starts a topic unrelated to \
         the document.\n\n\
         Conversation History:\n{history}\n\n\
         Current User Query:\n\"{query}\"\n\n\
         Respond with ONLY the category name: DOCUMENT_HANDLER or GENERAL_KNOWLEDGE_BASE."
    )
}

/// Ask whether the request is to translate the whole document.
pub fn translation_intent(message: &str) -> String {
    format!(
        "Decide whether the following request asks to translate the uploaded document into \
         another language. Requests to summarize, explain or answer questions are not \
         translation requests.\n\n\
         Request: \"{message}\"\n\n\
         Respond with only YES or NO."
    )
}

/// Ask for the passages of `full_text` relevant to `question`.
pub fn extraction(full_text: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant. Read the document and the user's question. Extract every \
         paragraph and sentence of the document that is relevant to answering the question. \
         Copy them verbatim. If no part of the document is relevant, respond with exactly \
         '{NO_RELEVANT_INFORMATION}'\n\n\
         --- Document ---\n{full_text}\n\n\
         --- User's Question ---\n{question}"
    )
}

/// Apply the user's task to one window of a long document.
pub fn map_window(language: Language, task: &str, window: &str, index: usize, total: usize) -> String {
    match language {
        Language::English => format!(
            "You are reading section {index} of {total} of a long document. Carry out the user's \
             request using ONLY this section. Report what this section contributes; if it \
             contributes nothing, say so in one sentence.\n\n\
             User request: {task}\n\n\
             --- Section {index}/{total} ---\n{window}\n\n\
             Result for this section:"
        ),
        Language::Spanish => format!(
            "Estás leyendo la sección {index} de {total} de un documento extenso. Realiza la \
             solicitud del usuario usando SOLO esta sección. Indica lo que aporta esta sección; si \
             no aporta nada, dilo en una oración.\n\n\
             Solicitud del usuario: {task}\n\n\
             --- Sección {index}/{total} ---\n{window}\n\n\
             Resultado para esta sección:"
        ),
    }
}

/// Combine per-window results into one answer.
pub fn reduce(language: Language, task: &str, partials: &str) -> String {
    match language {
        Language::English => format!(
            "Below are partial results, one per section of a long document, in document order. \
             Combine them into one coherent, well-structured answer to the user's request. Remove \
             repetition. Keep any bracketed note saying a section could not be processed.\n\n\
             User request: {task}\n\n\
             {partials}\n\n\
             Final answer:"
        ),
        Language::Spanish => format!(
            "A continuación hay resultados parciales, uno por sección de un documento extenso, en \
             orden. Combínalos en una única respuesta coherente y bien estructurada a la solicitud \
             del usuario. Elimina repeticiones. Conserva cualquier nota entre corchetes que diga que \
             una sección no se pudo procesar.\n\n\
             Solicitud del usuario: {task}\n\n\
             {partials}\n\n\
             Respuesta final:"
        ),
    }
}

/// Translate one window.
pub fn translate_window(target: Language, window: &str) -> String {
    match target {
        Language::English => format!(
            "Translate the following text into English. Preserve meaning, names, numbers and \
             paragraph breaks. Output only the translation.\n\n{window}"
        ),
        Language::Spanish => format!(
            "Traduce el siguiente texto al español. Conserva el significado, los nombres, las cifras \
             y los saltos de párrafo. Devuelve solo la traducción.\n\n{window}"
        ),
    }
}

/// Summarize an uploaded document.
pub fn summary(language: Language, text: &str) -> String {
    match language {
        Language::English => format!(
            "Summarize the following document in one short paragraph. Mention its purpose and the \
             key facts, dates and names it contains.\n\n{text}\n\nSummary:"
        ),
        Language::Spanish => format!(
            "Resume el siguiente documento en un párrafo breve. Menciona su propósito y los datos, \
             fechas y nombres clave que contiene.\n\n{text}\n\nResumen:"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn renders_named_variables() {
        let vars = HashMap::from([("name", "Ana"), ("n", "3")]);
        let text = render("Hi {{ name }}, {literal} x{{n}}", &vars).expect("render");
        assert_eq!(text, "Hi Ana, {literal} x3");
    }

    #[test]
    fn values_are_inserted_verbatim() {
        let vars = HashMap::from([("question", "<b>{{ x }}</b> & more")]);
        let text = render("Q: {{ question }}", &vars).expect("render");
        assert_eq!(text, "Q: <b>{{ x }}</b> & more");
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let vars = HashMap::from([("question", "q")]);
        assert!(matches!(
            render("{{ question }} {{ oops }}", &vars),
            Err(PromptError::UnknownVariable(name)) if name == "oops"
        ));
        assert!(matches!(
            render("{{ question", &vars),
            Err(PromptError::Template(_))
        ));
    }

    #[test]
    fn builtin_answer_templates_render() {
        let library = PromptLibrary::builtin();
        let english = library
            .render_answer(Language::English, "persona", "[1] ctx", "", "When?")
            .expect("english");
        assert!(english.starts_with("persona\n\nContext:\n[1] ctx"));
        assert!(english.ends_with("Question: When?\nAnswer:"));
        let spanish = library
            .render_answer(Language::Spanish, "p", "c", "", "¿Cuándo?")
            .expect("spanish");
        assert!(spanish.contains("Contexto:\nc"));
        assert!(spanish.ends_with("Pregunta: ¿Cuándo?\nRespuesta:"));
    }

    #[test]
    fn template_without_question_is_rejected() {
        let library = PromptLibrary::with_templates("{{ context }} only", ANSWER_TEMPLATE_ES);
        assert!(matches!(
            library.render_answer(Language::English, "p", "c", "", "q"),
            Err(PromptError::MissingQuestion(_))
        ));
    }

    #[test]
    fn overrides_are_loaded_from_directory() {
        let dir = std::env::temp_dir().join(format!("docent-prompts-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("dir");
        fs::write(dir.join("answer_en.txt"), "CTX={{ context }} Q={{ question }}").expect("write");

        let library = PromptLibrary::load(&dir).expect("load");
        assert_eq!(library.answer_template(Language::English), "CTX={{ context }} Q={{ question }}");
        assert_eq!(library.answer_template(Language::Spanish), ANSWER_TEMPLATE_ES);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn extraction_prompt_names_the_not_found_sentence() {
        let prompt = extraction("doc", "q");
        assert!(prompt.contains(NO_RELEVANT_INFORMATION));
    }
}
