//! Role prompt builders for debater and judge turns.
//!
//! Every prompt ends with an explicit JSON schema naming the fields the
//! decode step requires. Openings are independent: neither debater's
//! opening prompt carries the other's output. Debater Y's open-ended
//! opening instead carries a standing instruction to take a distinct
//! critical perspective, which keeps the debate adversarial without a
//! data dependency between the two concurrent calls.

use debate::Question;

fn alternatives_block(question: &Question) -> String {
    question
        .alternatives
        .iter()
        .map(|a| format!("{}) {}", a.label, a.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn mcq_opening(question: &Question, assigned_label: &str) -> String {
    format!(
        "Você é um debatedor em um exame jurídico. Defenda a alternativa \
         '{assigned_label}' como a correta, com fundamentação legal e citações \
         (artigos, leis, súmulas).\n\nQuestão:\n{}\n\nAlternativas:\n{}\n\n\
         Responda apenas com um objeto JSON: \
         {{\"position\": \"{assigned_label}\", \"argument\": \"...\"}}",
        question.text,
        alternatives_block(question),
    )
}

pub fn mcq_rebuttal(
    question: &Question,
    assigned_label: &str,
    own_opening: &str,
    opponent_opening: &str,
) -> String {
    format!(
        "Você defende a alternativa '{assigned_label}'.\n\nQuestão:\n{}\n\n\
         Seu argumento de abertura:\n{own_opening}\n\n\
         Argumento de abertura do oponente:\n{opponent_opening}\n\n\
         Refute o argumento do oponente e reforce sua posição, citando a \
         legislação pertinente.\n\n\
         Responda apenas com um objeto JSON: {{\"rebuttal\": \"...\"}}",
        question.text,
    )
}

pub fn mcq_judge(question: &Question, transcript: &str) -> String {
    let labels = question.labels().join(", ");
    format!(
        "Você é o juiz de um debate sobre uma questão de exame jurídico. \
         Avalie os argumentos e escolha a alternativa correta.\n\n\
         Questão:\n{}\n\nAlternativas:\n{}\n\nDebate:\n{transcript}\n\n\
         Sua decisão DEVE ser uma das alternativas oferecidas: {labels}.\n\
         Responda apenas com um objeto JSON: \
         {{\"decision\": \"<{labels}>\", \"rationale\": \"...\"}}",
        question.text,
        alternatives_block(question),
    )
}

pub fn open_opening(question: &Question, critical_perspective: bool) -> String {
    let stance = if critical_perspective {
        "Adote uma perspectiva crítica distinta da resposta mais óbvia: \
         explore fundamentos alternativos, exceções e entendimentos \
         divergentes aplicáveis ao caso."
    } else {
        "Apresente a resposta que considera correta, com fundamentação \
         legal completa."
    };
    format!(
        "Você é um debatedor em um exame jurídico dissertativo. {stance}\n\n\
         Questão:\n{}\n\nCite artigos, leis e súmulas pertinentes.\n\n\
         Responda apenas com um objeto JSON: {{\"argument\": \"...\"}}",
        question.text,
    )
}

pub fn open_rebuttal(question: &Question, own_opening: &str, opponent_opening: &str) -> String {
    format!(
        "Questão dissertativa:\n{}\n\nSeu argumento de abertura:\n{own_opening}\n\n\
         Argumento de abertura do oponente:\n{opponent_opening}\n\n\
         Refute os pontos frágeis do oponente e reforce sua resposta.\n\n\
         Responda apenas com um objeto JSON: {{\"rebuttal\": \"...\"}}",
        question.text,
    )
}

pub fn open_judge(question: &Question, transcript: &str) -> String {
    format!(
        "Você é o juiz de um debate sobre uma questão dissertativa de exame \
         jurídico. Sintetize a melhor resposta a partir dos argumentos.\n\n\
         Questão:\n{}\n\nDebate:\n{transcript}\n\n\
         Responda apenas com um objeto JSON: \
         {{\"final_answer\": \"...\", \"rationale\": \"...\"}}",
        question.text,
    )
}

/// One-shot clarifying re-prompt after a malformed completion.
pub fn clarify(original_prompt: &str, reason: &str, schema: &str) -> String {
    format!(
        "{original_prompt}\n\nSua resposta anterior não pôde ser processada \
         ({reason}). Responda NOVAMENTE, apenas com um objeto JSON válido no \
         formato: {schema}",
    )
}

/// One-shot judge re-prompt after a decision outside the offered label set.
pub fn judge_label_reminder(original_prompt: &str, invalid: &str, labels: &[String]) -> String {
    format!(
        "{original_prompt}\n\nSua decisão anterior ('{invalid}') não é uma das \
         alternativas oferecidas. A decisão DEVE ser exatamente uma de: {}.",
        labels.join(", "),
    )
}
