use diversion_core::{EntityLevel, Severity, ValidationFinding};

pub(crate) const LEVELS: [EntityLevel; 3] =
    [EntityLevel::Facility, EntityLevel::County, EntityLevel::State];

pub(crate) struct App {
    pub source: String,
    pub findings: Vec<ValidationFinding>,

    pub level_index: usize,
    pub list_index: usize,
    pub show_detail: bool,
}

impl App {
    pub(crate) fn new(source: String, findings: Vec<ValidationFinding>) -> Self {
        let mut app = Self {
            source,
            findings,
            level_index: 0,
            list_index: 0,
            show_detail: false,
        };
        // Open on the first level that has anything to show.
        if let Some(index) = LEVELS
            .iter()
            .position(|level| app.count_at(*level) > 0)
        {
            app.level_index = index;
        }
        app
    }

    pub(crate) fn level(&self) -> EntityLevel {
        LEVELS
            .get(self.level_index)
            .copied()
            .unwrap_or(EntityLevel::Facility)
    }

    pub(crate) fn count_at(&self, level: EntityLevel) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.level == level)
            .count()
    }

    pub(crate) fn visible(&self) -> Vec<&ValidationFinding> {
        let level = self.level();
        self.findings
            .iter()
            .filter(|finding| finding.level == level)
            .collect()
    }

    pub(crate) fn selected(&self) -> Option<&ValidationFinding> {
        self.visible().get(self.list_index).copied()
    }

    pub(crate) fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|finding| finding.severity).max()
    }

    pub(crate) fn next_level(&mut self) {
        self.level_index = (self.level_index + 1) % LEVELS.len();
        self.list_index = 0;
        self.show_detail = false;
    }

    pub(crate) fn previous_level(&mut self) {
        self.level_index = (self.level_index + LEVELS.len() - 1) % LEVELS.len();
        self.list_index = 0;
        self.show_detail = false;
    }

    pub(crate) fn move_up(&mut self) {
        self.list_index = self.list_index.saturating_sub(1);
    }

    pub(crate) fn move_down(&mut self) {
        if self.list_index + 1 < self.visible().len() {
            self.list_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use diversion_core::{DeltaKind, Metric};

    use super::*;

    fn finding(level: EntityLevel, id: &str, severity: Severity) -> ValidationFinding {
        ValidationFinding {
            level,
            entity_id: id.to_owned(),
            entity_name: id.to_owned(),
            metric: Metric::DivertedTons,
            prior: 100.0,
            current: 200.0,
            absolute_delta: 100.0,
            percent_delta: Some(100.0),
            delta_kind: DeltaKind::Percentage,
            severity,
        }
    }

    #[test]
    fn opens_on_first_populated_level() {
        let app = App::new(
            "findings.json".to_owned(),
            vec![
                finding(EntityLevel::County, "Cache", Severity::Notice),
                finding(EntityLevel::State, "state", Severity::Critical),
            ],
        );

        assert_eq!(app.level(), EntityLevel::County);
        assert_eq!(app.worst_severity(), Some(Severity::Critical));
    }

    #[test]
    fn navigation_stays_in_bounds() {
        let mut app = App::new(
            "findings.json".to_owned(),
            vec![
                finding(EntityLevel::Facility, "SW1", Severity::Warning),
                finding(EntityLevel::Facility, "SW2", Severity::Notice),
            ],
        );

        app.move_down();
        app.move_down();
        assert_eq!(app.selected().map(|finding| finding.entity_id.as_str()), Some("SW2"));

        app.previous_level();
        assert_eq!(app.level(), EntityLevel::State);
        assert_eq!(app.selected(), None);
        app.move_up();
        assert_eq!(app.list_index, 0);
    }
}
