//! More-style paging for output longer than one screen.
//!
//! The held text is shown a screenful at a time, sized by the client's
//! reported window height. While the pager is open, ENTER (or `c`)
//! advances, `r` refreshes the page, `b` goes back, `q` quits.

/// Held text plus the reader's position.
#[derive(Debug, Clone)]
pub struct PagerState {
    lines: Vec<String>,
    offset: usize,
    last_page: usize,
}

/// Outcome of one line typed at the pager prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerAction {
    /// Send this chunk and stay in the pager
    Show(String),
    /// Reader is done (scrolled to the end or quit)
    Quit,
}

impl PagerState {
    pub fn new(text: &str) -> Self {
        let lines = text
            .replace("\n\r", "\n")
            .replace('\r', "\n")
            .split('\n')
            .map(str::to_string)
            .collect();
        Self {
            lines,
            offset: 0,
            last_page: 0,
        }
    }

    /// Lines shown per screen for a given window height, leaving room
    /// for the continuation prompt.
    fn page_size(height: usize) -> usize {
        height.saturating_sub(2).max(4)
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.lines.len()
    }

    /// Produce the next screenful and advance.
    pub fn advance(&mut self, height: usize) -> String {
        let size = Self::page_size(height);
        let end = (self.offset + size).min(self.lines.len());
        let mut out = String::new();
        for line in &self.lines[self.offset..end] {
            out.push_str(line);
            out.push_str("\n\r");
        }
        self.last_page = end - self.offset;
        self.offset = end;

        if !self.is_done() {
            out.push_str("#7[Hit Return to continue, (r)efresh, (b)ack, (q)uit]#n\n\r");
        }
        out
    }

    fn rewind(&mut self, pages: usize, height: usize) {
        let size = Self::page_size(height);
        let back = self.last_page + size * pages.saturating_sub(1);
        self.offset = self.offset.saturating_sub(back);
    }
}

/// Route one pager-prompt line.
pub fn handle_line(pager: &mut PagerState, line: &str, height: usize) -> PagerAction {
    match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('q') => PagerAction::Quit,
        Some('b') => {
            pager.rewind(2, height);
            PagerAction::Show(pager.advance(height))
        }
        Some('r') => {
            pager.rewind(1, height);
            PagerAction::Show(pager.advance(height))
        }
        _ => {
            if pager.is_done() {
                PagerAction::Quit
            } else {
                PagerAction::Show(pager.advance(height))
            }
        }
    }
}
