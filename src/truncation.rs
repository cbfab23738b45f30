use tracing::warn;

use crate::request::{Completion, FinishReason, Request, Token};

/// Cuts a completion at the first stop sequence (then the end-of-text marker) and
/// caps it at `max_tokens` tokens, recomputing the aggregate logprob each time.
/// Completions that echo the prompt are returned untouched.
pub fn truncate_sequence(
    completion: Completion,
    request: &Request,
    end_of_text_token: Option<&str>,
) -> Completion {
    if request.echo_prompt {
        if !request.stop_sequences.is_empty() {
            warn!("not truncating a completion that echoes its prompt");
        }
        return completion;
    }

    let mut completion = completion;
    for stop in request
        .stop_sequences
        .iter()
        .map(String::as_str)
        .chain(end_of_text_token)
    {
        if !stop.is_empty() {
            completion = truncate_at(completion, stop);
        }
    }

    if completion.tokens.len() > request.max_tokens {
        let tokens: Vec<Token> = completion
            .tokens
            .into_iter()
            .take(request.max_tokens)
            .collect();
        let text = tokens.iter().map(|token| token.text.as_str()).collect();
        completion = Completion {
            finish_reason: Some(FinishReason::Length),
            media: completion.media,
            ..Completion::from_tokens(text, tokens)
        };
    }

    completion
}

fn truncate_at(completion: Completion, stop: &str) -> Completion {
    let text_cut = completion.text.find(stop);

    // Tokens can only be dropped whole: keep those ending at or before the marker.
    let joined: String = completion.tokens.iter().map(|t| t.text.as_str()).collect();
    let token_cut = joined.find(stop).map(|position| {
        let mut end = 0;
        completion
            .tokens
            .iter()
            .take_while(|token| {
                end += token.text.len();
                end <= position
            })
            .count()
    });

    match (text_cut, token_cut) {
        (None, None) => return completion,
        (Some(_), None) => warn!(stop, "stop sequence found in text but not at a token boundary"),
        (None, Some(_)) => warn!(stop, "stop sequence found in tokens but not in decoded text"),
        (Some(_), Some(_)) => {}
    }

    let Completion {
        mut text,
        mut tokens,
        media,
        ..
    } = completion;
    if let Some(position) = text_cut {
        text.truncate(position);
    }
    if let Some(count) = token_cut {
        tokens.truncate(count);
    }

    Completion {
        finish_reason: Some(FinishReason::Stop),
        media,
        ..Completion::from_tokens(text, tokens)
    }
}
