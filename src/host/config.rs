//! The `config` namespace: read-only access to run configuration and secrets.

use crate::host::context::RunContext;
use crate::host::{Args, Namespace};
use crate::value::DynamicValue;

pub fn namespace(ctx: &RunContext) -> Namespace {
    let config = ctx.clone();
    let secrets = ctx.clone();
    Namespace::new("config")
        .with("get_config", move |args| {
            let args = Args::new("get_config", args, 1)?;
            match args.optional(0) {
                None => Ok(DynamicValue::Mapping(config.config())),
                Some(_) => Ok(config.config_value(args.string(0, "key")?)),
            }
        })
        .with("get_secret", move |args| {
            let args = Args::new("get_secret", args, 1)?;
            Ok(secrets.secret(args.string(0, "key")?))
        })
}
