//! Mock recognition engines for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::recognizer::{CodeRecognizer, RecognizerError, VisionRecognizer, RECOGNITION_PROMPT};

type Answer = Result<Option<String>, RecognizerError>;

/// Queue of answers; the last one repeats once the rest are used.
#[derive(Debug, Default)]
struct Answers {
    queue: VecDeque<Answer>,
}

impl Answers {
    fn next(&mut self) -> Answer {
        if self.queue.len() > 1 {
            self.queue.pop_front().unwrap_or(Ok(None))
        } else {
            self.queue.front().cloned().unwrap_or(Ok(None))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock specialized recognizer.
///
/// Answers `Ok(None)` until answers are pushed.
#[derive(Debug, Default)]
pub struct MockCodeRecognizer {
    answers: Mutex<Answers>,
    images: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockCodeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `code`.
    pub fn answering(code: &str) -> Self {
        let mock = Self::new();
        mock.push(Ok(Some(code.to_string())));
        mock
    }

    /// Answer each of `codes` once, in order, repeating the last.
    pub fn sequence(codes: &[&str]) -> Self {
        let mock = Self::new();
        for code in codes {
            mock.push(Ok(Some(code.to_string())));
        }
        mock
    }

    pub fn push(&self, answer: Answer) {
        lock(&self.answers).queue.push_back(answer);
    }

    /// Images received, in order.
    pub fn images(&self) -> Vec<Vec<u8>> {
        lock(&self.images).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.images).len()
    }
}

#[async_trait]
impl CodeRecognizer for MockCodeRecognizer {
    fn name(&self) -> &str {
        "mock-ocr"
    }

    async fn recognize(&self, image: &[u8]) -> Answer {
        lock(&self.images).push(image.to_vec());
        lock(&self.answers).next()
    }
}

/// Mock vision recognizer.
///
/// Plain recognition and arbitration (any prompt other than the recognition
/// prompt) are scripted separately.
#[derive(Debug, Default)]
pub struct MockVisionRecognizer {
    answers: Mutex<Answers>,
    arbitration: Mutex<Answers>,
    prompts: Mutex<Vec<String>>,
}

impl MockVisionRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(code: &str) -> Self {
        let mock = Self::new();
        mock.push(Ok(Some(code.to_string())));
        mock
    }

    pub fn push(&self, answer: Answer) {
        lock(&self.answers).queue.push_back(answer);
    }

    /// Answer for every arbitration request.
    pub fn set_arbitration(&self, answer: Answer) {
        let mut arbitration = lock(&self.arbitration);
        arbitration.queue.clear();
        arbitration.queue.push_back(answer);
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn arbitration_count(&self) -> usize {
        lock(&self.prompts)
            .iter()
            .filter(|p| p.as_str() != RECOGNITION_PROMPT)
            .count()
    }
}

#[async_trait]
impl VisionRecognizer for MockVisionRecognizer {
    fn name(&self) -> &str {
        "mock-vision"
    }

    async fn recognize(&self, _image: &[u8], prompt: &str) -> Answer {
        lock(&self.prompts).push(prompt.to_string());
        if prompt == RECOGNITION_PROMPT {
            lock(&self.answers).next()
        } else {
            lock(&self.arbitration).next()
        }
    }
}
