//! Cloud collaborators the preprocessor consults: the current region and
//! account, and the parameters and outputs of deployed stacks.

use indexmap::IndexMap;

/// Merged parameters and outputs of a deployed stack.
pub type StackValues = IndexMap<String, String>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Stack {stack} not found in {region}")]
    NotFound { region: String, stack: String },

    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),
}

pub trait CloudProvider {
    fn region(&self) -> Option<String>;

    fn account_id(&self) -> Option<String>;

    fn stack_params_and_outputs(
        &self,
        region: &str,
        stack_name: &str,
    ) -> Result<StackValues, LookupError>;
}

/// In-memory provider for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    region: Option<String>,
    account_id: Option<String>,
    stacks: IndexMap<String, StackValues>,
}

impl StaticProvider {
    pub fn new(region: Option<String>, account_id: Option<String>) -> Self {
        StaticProvider {
            region,
            account_id,
            stacks: IndexMap::new(),
        }
    }

    /// Seeded from `REGION` and `ACCOUNT_ID` in the environment.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("REGION").ok(),
            std::env::var("ACCOUNT_ID").ok(),
        )
    }

    pub fn with_stack(mut self, region: &str, stack_name: &str, values: StackValues) -> Self {
        self.stacks.insert(stack_key(region, stack_name), values);
        self
    }
}

impl CloudProvider for StaticProvider {
    fn region(&self) -> Option<String> {
        self.region.clone()
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }

    fn stack_params_and_outputs(
        &self,
        region: &str,
        stack_name: &str,
    ) -> Result<StackValues, LookupError> {
        self.stacks
            .get(&stack_key(region, stack_name))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                region: region.to_string(),
                stack: stack_name.to_string(),
            })
    }
}

pub(crate) fn stack_key(region: &str, stack_name: &str) -> String {
    format!("{}.{}", region, stack_name)
}
