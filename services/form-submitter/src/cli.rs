use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use common::SubmitterConfig;
use contracts::{Form, DEFAULT_FILE_CONTENT_TYPE};

#[derive(Parser, Debug)]
#[command(name = "form-submitter", about = "Queue HTTP form submissions and print the results")]
pub struct Cli {
    /// Target URL of the POST
    #[arg(long)]
    pub url: String,

    /// Form field as name=value; repeatable, order is kept
    #[arg(long = "field", value_name = "NAME=VALUE")]
    pub fields: Vec<String>,

    /// Attachment as name=path[:content-type]; switches to multipart
    #[arg(long = "file", value_name = "NAME=PATH[:TYPE]")]
    pub files: Vec<String>,

    /// Raw JSON payload; takes precedence over fields and files
    #[arg(long)]
    pub json: Option<String>,

    /// How many times to queue the form
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Submit without waiting for or printing the replies
    #[arg(long)]
    pub ignore_reply: bool,

    /// Request timeout in seconds (overrides FORM_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub user_agent: Option<String>,

    #[arg(long)]
    pub accept: Option<String>,

    #[arg(long)]
    pub csrf_token: Option<String>,

    /// Log outgoing request headers
    #[arg(long)]
    pub verbose: bool,

    /// Directory relative attachment paths are resolved against
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    pub fn apply(&self, config: &mut SubmitterConfig) {
        if let Some(secs) = self.timeout {
            config.timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(accept) = &self.accept {
            config.accept = accept.clone();
        }
        if let Some(token) = &self.csrf_token {
            config.csrf_token = token.clone();
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
    }

    pub fn build_form(&self) -> Result<Form> {
        let mut form = Form::new(self.url.clone());

        for raw in &self.fields {
            let (name, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("field {raw:?} is not NAME=VALUE"))?;
            form.add_field(name, value);
        }

        for raw in &self.files {
            let (name, target) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("file {raw:?} is not NAME=PATH[:TYPE]"))?;
            let (path, content_type) = match target.rsplit_once(':') {
                Some((path, content_type)) if content_type.contains('/') => (path, content_type),
                _ => (target, DEFAULT_FILE_CONTENT_TYPE),
            };
            form.add_file(name, path, content_type);
        }

        if let Some(json) = &self.json {
            form.set_json(json.clone());
        }

        Ok(form)
    }
}
