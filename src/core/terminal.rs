use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_banner() {
    println!();
    println!("{}", style(" cortexkit ").bold().black().on_cyan());
    println!("{}\n", style("Tracked warehouse jobs and agent chat.").cyan());
}

enum Line {
    Command(String, String),
    Status(String, String),
    Text(String),
    Bullet(String),
    Hint(String, String),
    Blank,
}

/// A titled block of terminal output, built up and printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<Line>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(Line::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(Line::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(Line::Text(text.to_string()));
        self
    }

    pub fn bullet(mut self, text: &str) -> Self {
        self.lines.push(Line::Bullet(text.to_string()));
        self
    }

    /// An example invocation, with an optional note after it.
    pub fn hint(mut self, example: &str, note: &str) -> Self {
        self.lines
            .push(Line::Hint(example.to_string(), note.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(Line::Blank);
        self
    }

    pub fn render(&self) -> String {
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                Line::Command(name, _) => Some(name.chars().count()),
                Line::Status(label, _) => Some(label.chars().count() + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = format!("\n {}\n", style(&self.title).bold().underlined());
        for line in &self.lines {
            let rendered = match line {
                Line::Command(name, description) => format!(
                    "   {}  {}",
                    style(format!("{:<width$}", name, width = width)).cyan().bold(),
                    description
                ),
                Line::Status(label, value) => format!(
                    "   {}  {}",
                    style(format!("{:<width$}", format!("{}:", label), width = width)).bold(),
                    value
                ),
                Line::Text(text) => format!("   {}", text),
                Line::Bullet(text) => format!("   • {}", text),
                Line::Hint(example, note) if note.is_empty() => {
                    format!("   $ {}", style(example).dim())
                }
                Line::Hint(example, note) => {
                    format!("   $ {}  {}", style(example).dim(), style(note).dim().italic())
                }
                Line::Blank => String::new(),
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        out
    }

    pub fn print(self) {
        print!("{}", self.render());
    }
}
