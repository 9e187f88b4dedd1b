use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation as cloudformation;
use aws_sdk_cloudformation::error::{DisplayErrorContext, SdkError};
use aws_sdk_sts as sts;
use tracing::{debug, warn};

use crate::provider::{CloudProvider, LookupError, StackValues};

/// [`CloudProvider`] backed by the AWS APIs.
///
/// The preprocessor is synchronous, so the provider owns a small runtime and
/// blocks on each call.
pub struct AwsProvider {
    runtime: tokio::runtime::Runtime,
    config: SdkConfig,
}

impl AwsProvider {
    pub fn new() -> Result<Self, LookupError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| LookupError::UnknownError(err.to_string()))?;
        let config = runtime.block_on(aws_config::load_defaults(BehaviorVersion::latest()));
        Ok(AwsProvider { runtime, config })
    }
}

impl CloudProvider for AwsProvider {
    fn region(&self) -> Option<String> {
        self.config.region().map(|region| region.to_string())
    }

    fn account_id(&self) -> Option<String> {
        let client = sts::Client::new(&self.config);
        match self.runtime.block_on(client.get_caller_identity().send()) {
            Ok(identity) => identity.account().map(str::to_string),
            Err(err) => {
                warn!("Unable to resolve account id: {}", DisplayErrorContext(&err));
                None
            }
        }
    }

    fn stack_params_and_outputs(
        &self,
        region: &str,
        stack_name: &str,
    ) -> Result<StackValues, LookupError> {
        debug!(region, stack_name, "describing stack");
        self.runtime
            .block_on(describe_stack(&self.config, region, stack_name))
    }
}

async fn describe_stack(
    config: &SdkConfig,
    region: &str,
    stack_name: &str,
) -> Result<StackValues, LookupError> {
    let cfn_config = cloudformation::config::Builder::from(config)
        .region(Region::new(region.to_string()))
        .build();
    let client = cloudformation::Client::from_conf(cfn_config);

    let result = client.describe_stacks().stack_name(stack_name).send().await;
    let result = match result {
        Ok(data) => data,
        Err(SdkError::ServiceError(context)) => {
            return Err(LookupError::ServiceError(context.err().to_string()));
        }
        Err(err) => {
            return Err(LookupError::UnknownError(
                DisplayErrorContext(&err).to_string(),
            ))
        }
    };

    let stack = result.stacks().first().ok_or_else(|| LookupError::NotFound {
        region: region.to_string(),
        stack: stack_name.to_string(),
    })?;

    let mut values = StackValues::new();
    for parameter in stack.parameters() {
        if let (Some(key), Some(value)) = (parameter.parameter_key(), parameter.parameter_value()) {
            values.insert(key.to_string(), value.to_string());
        }
    }
    // outputs win over parameters with the same name
    for output in stack.outputs() {
        if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
            values.insert(key.to_string(), value.to_string());
        }
    }
    Ok(values)
}
