//! Line-oriented text editor for in-game string editing.
//!
//! Lines starting with `/` (or `\`) are meta-commands; anything else is
//! written at the cursor. The buffer is bounded; overflowing it saves
//! automatically so nothing typed is lost.

/// Hard bounds on the edit buffer.
pub const MAX_EDIT_LINES: usize = 50;
pub const MAX_EDIT_COLS: usize = 79;

const HELP_TEXT: &str = "Editing commands\n\r---------------------------------\n\r\
/l              list buffer\n\r\
/c              clear buffer\n\r\
/d [line]       delete line\n\r\
/g <line>       goto line\n\r\
/i <line>       insert line\n\r\
/r <old> <new>  global replace\n\r\
/a              abort editing\n\r\
/s              save buffer\n\r\n\r> ";

const HELP_SHELL_LINE: &str = "/! <command>    execute command\n\r";

/// The per-session edit buffer: a line array and a cursor.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    lines: Vec<String>,
    on_line: usize,
}

/// What the session loop should do after one editor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorAction {
    /// Stay in the editor; send this response text
    Continue(String),
    /// Save the buffer and return to play
    Save,
    /// Throw the buffer away and return to play
    Abort,
    /// Run this as a normal command, then return to the editor
    Shell(String),
}

impl EditorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the buffer from existing text, splitting on newlines and
    /// wrapping anything past the column limit.
    pub fn from_text(text: &str) -> Self {
        let mut lines = Vec::new();
        for raw in text.replace('\r', "").split('\n') {
            if lines.len() >= MAX_EDIT_LINES {
                break;
            }
            let mut rest = raw;
            loop {
                if rest.len() <= MAX_EDIT_COLS {
                    lines.push(rest.to_string());
                    break;
                }
                let (head, tail) = rest.split_at(MAX_EDIT_COLS);
                lines.push(head.to_string());
                rest = tail;
                if lines.len() >= MAX_EDIT_LINES {
                    break;
                }
            }
        }
        // A trailing newline in the input leaves an empty phantom line
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        let on_line = lines.len();
        Self { lines, on_line }
    }

    /// The buffer joined back into note/description text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push_str("\n\r");
        }
        out
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn cursor(&self) -> usize {
        self.on_line
    }

    fn listing(&self) -> String {
        if self.lines.is_empty() {
            return "Buffer is empty.\n\r> ".to_string();
        }
        let mut out = String::from("------------------\n\r");
        for (i, line) in self.lines.iter().enumerate() {
            out.push_str(&format!("{:2}> {}\n\r", i + 1, line));
        }
        out.push_str("------------------\n\r> ");
        out
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.on_line = 0;
    }

    /// 1-based argument, falling back to the cursor.
    fn arg_line(&self, arg: Option<&str>) -> Option<usize> {
        match arg {
            Some(n) => n.parse::<usize>().ok().map(|n| n.saturating_sub(1)),
            None => Some(self.on_line),
        }
    }

    fn delete(&mut self, line: usize) -> String {
        if self.lines.is_empty() {
            return "Buffer is empty.\n\r> ".to_string();
        }
        if line >= self.lines.len() {
            return "Out of range.\n\r> ".to_string();
        }
        self.lines.remove(line);
        if self.on_line > self.lines.len() {
            self.on_line = self.lines.len();
        }
        "Line deleted.\n\r> ".to_string()
    }

    fn goto(&mut self, line: usize) -> String {
        if self.lines.is_empty() {
            return "Buffer is empty.\n\r> ".to_string();
        }
        if line > self.lines.len() {
            return "Out of range.\n\r> ".to_string();
        }
        self.on_line = line;
        format!("(On line {})\n\r> ", line + 1)
    }

    fn insert(&mut self, line: usize) -> String {
        if self.lines.len() >= MAX_EDIT_LINES {
            return "Buffer is full.\n\r> ".to_string();
        }
        if line > self.lines.len() {
            return "Out of range.\n\r> ".to_string();
        }
        self.lines.insert(line, String::new());
        "Line inserted.\n\r> ".to_string()
    }

    fn replace(&mut self, old: &str, new: &str) -> String {
        if old == new {
            return "Done.\n\r> ".to_string();
        }
        let mut count = 0;
        for line in &mut self.lines {
            let hits = line.matches(old).count();
            if hits > 0 {
                count += hits;
                let mut replaced = line.replace(old, new);
                if replaced.len() > MAX_EDIT_COLS {
                    replaced.truncate(MAX_EDIT_COLS);
                }
                *line = replaced;
            }
        }
        format!("Found and replaced {} occurrence(s).\n\r> ", count)
    }

    /// Write text at the cursor, overwriting an existing line or
    /// appending at the end. Returns the response; `saved` comes back
    /// true when the buffer filled and auto-saved.
    fn write_line(&mut self, text: &str) -> (String, bool) {
        let (kept, trimmed) = if text.len() > MAX_EDIT_COLS {
            (&text[..MAX_EDIT_COLS], true)
        } else {
            (text, false)
        };

        if self.on_line < self.lines.len() {
            self.lines[self.on_line] = kept.to_string();
        } else {
            self.lines.push(kept.to_string());
        }
        self.on_line += 1;

        if self.lines.len() >= MAX_EDIT_LINES {
            return ("Buffer full.\n\r".to_string(), true);
        }

        let response = if trimmed {
            "(Long line trimmed)\n\r> ".to_string()
        } else {
            "> ".to_string()
        };
        (response, false)
    }
}

/// Process one line typed while editing.
pub fn handle_line(edit: &mut EditorState, line: &str, allow_shell: bool) -> EditorAction {
    if line.starts_with('/') || line.starts_with('\\') {
        let body = &line[1..];
        let mut parts = body.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match cmd {
            "?" => {
                let mut help = HELP_TEXT.to_string();
                if allow_shell {
                    let at = help.find("/s ").unwrap_or(help.len());
                    help.insert_str(at, HELP_SHELL_LINE);
                }
                return EditorAction::Continue(help);
            }
            "l" => return EditorAction::Continue(edit.listing()),
            "c" => {
                edit.clear();
                return EditorAction::Continue("Buffer cleared.\n\r> ".to_string());
            }
            "d" => {
                let response = match edit.arg_line(rest) {
                    Some(n) => edit.delete(n),
                    None => "Out of range.\n\r> ".to_string(),
                };
                return EditorAction::Continue(response);
            }
            "g" => {
                let response = match rest {
                    Some(arg) => match arg.parse::<usize>() {
                        Ok(n) if n >= 1 => edit.goto(n - 1),
                        _ => "Out of range.\n\r> ".to_string(),
                    },
                    None => "Goto what line?\n\r> ".to_string(),
                };
                return EditorAction::Continue(response);
            }
            "i" => {
                let response = match edit.arg_line(rest) {
                    Some(n) => edit.insert(n),
                    None => "Out of range.\n\r> ".to_string(),
                };
                return EditorAction::Continue(response);
            }
            "r" => {
                let Some(rest) = rest else {
                    return EditorAction::Continue(
                        "Need word to replace, and replacement.\n\r> ".to_string(),
                    );
                };
                let mut words = rest.splitn(2, ' ');
                let old = words.next().unwrap_or("");
                let new = words.next().unwrap_or("").trim();
                if old.is_empty() || new.is_empty() {
                    return EditorAction::Continue(
                        "Need word to replace, and replacement.\n\r> ".to_string(),
                    );
                }
                return EditorAction::Continue(edit.replace(old, new));
            }
            "a" => return EditorAction::Abort,
            "s" => return EditorAction::Save,
            "!" => {
                if allow_shell {
                    if let Some(command) = rest {
                        return EditorAction::Shell(command.to_string());
                    }
                    return EditorAction::Continue("Execute what?\n\r> ".to_string());
                }
                // fall through to treat it as text for the unprivileged
            }
            _ => {}
        }
        // Unrecognised meta-command: stored as ordinary text, same as
        // any other line
    }

    let (response, save) = edit.write_line(line);
    if save {
        return EditorAction::Save;
    }
    EditorAction::Continue(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(edit: &mut EditorState, line: &str) -> EditorAction {
        handle_line(edit, line, false)
    }

    #[test]
    fn append_and_list() {
        let mut edit = EditorState::new();
        run(&mut edit, "first line");
        run(&mut edit, "second line");
        assert_eq!(edit.line_count(), 2);

        let EditorAction::Continue(listing) = run(&mut edit, "/l") else {
            panic!("expected listing");
        };
        assert!(listing.contains(" 1> first line"));
        assert!(listing.contains(" 2> second line"));
    }

    #[test]
    fn clear_empties_buffer() {
        let mut edit = EditorState::new();
        run(&mut edit, "junk");
        run(&mut edit, "/c");
        assert_eq!(edit.line_count(), 0);
        assert_eq!(edit.cursor(), 0);
    }

    #[test]
    fn delete_line_by_number() {
        let mut edit = EditorState::new();
        run(&mut edit, "one");
        run(&mut edit, "two");
        run(&mut edit, "three");
        run(&mut edit, "/d 2");
        assert_eq!(edit.line_count(), 2);
        assert_eq!(edit.to_text(), "one\n\rthree\n\r");
    }

    #[test]
    fn goto_moves_cursor_and_overwrites() {
        let mut edit = EditorState::new();
        run(&mut edit, "one");
        run(&mut edit, "two");
        let EditorAction::Continue(msg) = run(&mut edit, "/g 1") else {
            panic!()
        };
        assert!(msg.contains("On line 1"));
        run(&mut edit, "ONE");
        assert_eq!(edit.to_text(), "ONE\n\rtwo\n\r");
    }

    #[test]
    fn insert_blank_line() {
        let mut edit = EditorState::new();
        run(&mut edit, "one");
        run(&mut edit, "three");
        run(&mut edit, "/i 2");
        assert_eq!(edit.to_text(), "one\n\r\n\rthree\n\r");
    }

    #[test]
    fn global_replace() {
        let mut edit = EditorState::new();
        run(&mut edit, "the cat sat on the mat");
        run(&mut edit, "a cat is a cat");
        let EditorAction::Continue(msg) = run(&mut edit, "/r cat dog") else {
            panic!()
        };
        assert!(msg.contains("3 occurrence(s)"));
        assert_eq!(edit.to_text(), "the dog sat on the mat\n\ra dog is a dog\n\r");
    }

    #[test]
    fn save_and_abort() {
        let mut edit = EditorState::new();
        run(&mut edit, "text");
        assert_eq!(run(&mut edit, "/s"), EditorAction::Save);
        assert_eq!(run(&mut edit, "/a"), EditorAction::Abort);
    }

    #[test]
    fn shell_requires_privilege() {
        let mut edit = EditorState::new();
        assert_eq!(
            handle_line(&mut edit, "/! slay rat", true),
            EditorAction::Shell("slay rat".to_string())
        );
        // Unprivileged: the line lands in the buffer as text
        let mut edit = EditorState::new();
        assert!(matches!(
            handle_line(&mut edit, "/! slay rat", false),
            EditorAction::Continue(_)
        ));
        assert_eq!(edit.line_count(), 1);
    }

    #[test]
    fn long_line_trimmed() {
        let mut edit = EditorState::new();
        let long = "x".repeat(120);
        let EditorAction::Continue(msg) = run(&mut edit, &long) else {
            panic!()
        };
        assert!(msg.contains("Long line trimmed"));
        assert_eq!(edit.to_text().trim_end().len(), MAX_EDIT_COLS);
    }

    #[test]
    fn full_buffer_auto_saves() {
        let mut edit = EditorState::new();
        let mut action = EditorAction::Continue(String::new());
        for i in 0..MAX_EDIT_LINES + 5 {
            action = run(&mut edit, &format!("line {}", i));
            if action == EditorAction::Save {
                break;
            }
        }
        assert_eq!(action, EditorAction::Save);
        assert_eq!(edit.line_count(), MAX_EDIT_LINES);
    }

    #[test]
    fn seed_from_text_round_trips() {
        let text = "alpha\n\rbeta\n\rgamma\n\r";
        let edit = EditorState::from_text(text);
        assert_eq!(edit.line_count(), 3);
        assert_eq!(edit.to_text(), text);
    }

    #[test]
    fn help_hides_shell_escape() {
        let mut edit = EditorState::new();
        let EditorAction::Continue(help) = handle_line(&mut edit, "/?", false) else {
            panic!()
        };
        assert!(!help.contains("/!"));
        let EditorAction::Continue(help) = handle_line(&mut edit, "/?", true) else {
            panic!()
        };
        assert!(help.contains("/!"));
    }
}
