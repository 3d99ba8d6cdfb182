use crate::object::BATCH_SEPARATOR;

/// Renders executed statements as a script runnable by `sqlcmd`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Renderer;

impl Renderer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn render(&self, statements: &[String]) -> String {
        let mut rendered = String::new();
        for statement in statements {
            rendered.push_str(statement.trim_end());
            rendered.push('\n');
            self.push_batch_separator(&mut rendered);
        }
        rendered
    }

    fn push_batch_separator(&self, rendered: &mut String) {
        rendered.push_str(BATCH_SEPARATOR);
        rendered.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::Renderer;

    #[test]
    fn every_statement_ends_its_batch() {
        let rendered = Renderer::new().render(&[
            "DROP VIEW [dbo].[Recent]\n".to_string(),
            "CREATE VIEW [dbo].[Recent] AS SELECT 1 AS [One]".to_string(),
        ]);
        assert_eq!(
            rendered,
            "DROP VIEW [dbo].[Recent]\nGO\nCREATE VIEW [dbo].[Recent] AS SELECT 1 AS [One]\nGO\n"
        );
    }

    #[test]
    fn nothing_renders_empty() {
        assert_eq!(Renderer::new().render(&[]), "");
    }
}
