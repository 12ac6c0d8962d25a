#[derive(Debug, Clone)]
pub struct TableRef {
    pub dataset: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            dataset: None,
            name: name.into(),
        }
    }
}
