//! Bootstrap payload rendering using Handlebars.

use handlebars::{
    Context as HbsContext, Handlebars, Helper, HelperResult, Output, RenderContext,
};
use thiserror::Error;

use super::config::BootstrapConfig;

const CLOUD_INIT_TEMPLATE: &str = include_str!("../../templates/cloud-init.sh.hbs");
const CLOUD_INIT: &str = "cloud-init";

/// Errors raised while rendering a bootstrap payload.
#[derive(Error, Debug)]
pub enum ComposeError {
    /// The template failed to compile.
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    /// The template failed to render.
    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Turns a complete [`BootstrapConfig`] into instance user-data.
///
/// Implementations must be deterministic: the output ends up as user-data and
/// any drift between runs replaces the instance.
pub trait Composer: Send + Sync {
    /// Render the payload.
    ///
    /// # Errors
    /// Returns [`ComposeError`] if the payload cannot be rendered.
    fn compose(&self, config: &BootstrapConfig) -> Result<String, ComposeError>;
}

/// Quote a value for a POSIX shell.
/// Usage: `{{shquote variable}}`
fn shquote_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbsContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .unwrap_or_default();
    out.write(&format!("'{}'", value.replace('\'', r"'\''")))?;
    Ok(())
}

/// Renders the cloud-init shell script that installs salt-master and Teleport.
pub struct CloudInitComposer {
    handlebars: Handlebars<'static>,
}

impl CloudInitComposer {
    /// Compile the embedded template.
    ///
    /// # Errors
    /// Returns [`ComposeError::Template`] if the template does not compile.
    pub fn new() -> Result<Self, ComposeError> {
        let mut handlebars = Handlebars::new();

        // Every field must be present, and nothing is HTML.
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("shquote", Box::new(shquote_helper));
        handlebars.register_template_string(CLOUD_INIT, CLOUD_INIT_TEMPLATE)?;

        Ok(Self { handlebars })
    }
}

impl Composer for CloudInitComposer {
    fn compose(&self, config: &BootstrapConfig) -> Result<String, ComposeError> {
        Ok(self.handlebars.render(CLOUD_INIT, config)?)
    }
}
