//! List command implementation
//!
//! Queries every machine concurrently and prints one row per machine,
//! including records that failed to load.

use anyhow::{Result, anyhow};
use clap::Args;
use comfy_table::{Cell, ContentArrangement, Table};
use machina_core::environment::ProcessEnvironment;
use machina_core::list::{self, HostListItem, ListContext};

use crate::Context;
use crate::output::state_color;

/// Arguments for the ls command
#[derive(Args)]
pub struct LsArgs {
    /// Filter output, as key=value (driver, state, name, label); repeatable
    #[arg(short, long)]
    pub filter: Vec<String>,

    /// Print machine names only
    #[arg(long = "names-only", short = 'n')]
    pub names_only: bool,

    /// Per-machine timeout in seconds (defaults to `ls_timeout_secs` from the config)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Row template, e.g. "{{.Name}}: {{.URL}}"; a leading "table" adds aligned headers
    #[arg(long)]
    pub format: Option<String>,
}

pub async fn cmd_ls(args: &LsArgs, ctx: &Context) -> Result<()> {
    let filters = list::parse_filters(&args.filter)?;
    let (hosts, hosts_in_error) = if filters.needs_state() {
        ctx.client.load_all()?
    } else {
        ctx.client.load_all_stored()?
    };
    let hosts = list::filter_hosts(hosts, &filters);

    let format = args.format.as_deref().map(ListFormat::parse).transpose()?;

    if args.names_only || ctx.quiet {
        for host in &hosts {
            println!("{}", host.name);
        }
        return Ok(());
    }

    let timeout = args
        .timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| ctx.config.ls_timeout());
    let list_ctx = ListContext::from_env(&ProcessEnvironment, &ctx.config.engine_host_var, timeout)
        .with_decoder(ctx.client.decoder());

    let items = list::get_host_list_items(hosts, hosts_in_error, &list_ctx).await;
    match format {
        Some(format) if !format.table => {
            for item in &items {
                println!("{}", format.render(|field| field.value(item)));
            }
        }
        Some(format) => println!("{}", format.render_table(&items)),
        None => println!("{}", render_table(&items)),
    }
    Ok(())
}

/// Columns a `--format` template can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Active,
    ActiveHost,
    DriverName,
    State,
    Url,
    EngineOptions,
    Error,
    ResponseTime,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "Name" => Self::Name,
            "Active" => Self::Active,
            "ActiveHost" => Self::ActiveHost,
            "DriverName" => Self::DriverName,
            "State" => Self::State,
            "URL" => Self::Url,
            "EngineOptions" => Self::EngineOptions,
            "Error" => Self::Error,
            "ResponseTime" => Self::ResponseTime,
            _ => return None,
        })
    }

    fn header(self) -> String {
        match self {
            Self::Name => "NAME",
            Self::Active => "ACTIVE",
            Self::ActiveHost => "ACTIVE_HOST",
            Self::DriverName => "DRIVER",
            Self::State => "STATE",
            Self::Url => "URL",
            Self::EngineOptions => "ENGINE_OPTIONS",
            Self::Error => "ERRORS",
            Self::ResponseTime => "RESPONSE",
        }
        .to_string()
    }

    fn value(self, item: &HostListItem) -> String {
        match self {
            Self::Name => item.name.clone(),
            Self::Active => item.active_marker().to_string(),
            Self::ActiveHost => item.active.to_string(),
            Self::DriverName => item.driver_name.clone(),
            Self::State => item.state.to_string(),
            Self::Url => item.url.clone(),
            Self::EngineOptions => item
                .engine_options
                .as_ref()
                .and_then(|options| serde_json::to_string(options).ok())
                .unwrap_or_default(),
            Self::Error => item.error.clone(),
            Self::ResponseTime => format!("{}ms", item.response_time.as_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Parsed `--format` template
#[derive(Debug, Clone, PartialEq)]
struct ListFormat {
    table: bool,
    segments: Vec<Segment>,
}

impl ListFormat {
    /// `{{.Field}}` placeholders between literal text; `\t` and `\n` are
    /// unescaped
    fn parse(raw: &str) -> Result<Self> {
        let (table, body) = match raw.strip_prefix("table") {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let body = body.trim_matches(' ').replace("\\t", "\t").replace("\\n", "\n");

        let mut segments = Vec::new();
        let mut rest = body.as_str();
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| anyhow!("Unclosed placeholder in format {raw:?}"))?;
            let key = after[..close].trim();
            let name = key
                .strip_prefix('.')
                .ok_or_else(|| anyhow!("Unsupported placeholder {key:?} in format"))?;
            let field = Field::parse(name)
                .ok_or_else(|| anyhow!("Unknown field {name:?} in format"))?;
            segments.push(Segment::Field(field));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { table, segments })
    }

    fn render(&self, value: impl Fn(Field) -> String) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.clone(),
                Segment::Field(field) => value(*field),
            })
            .collect()
    }

    /// Tab-separated cells become aligned columns under a header row
    fn render_table(&self, items: &[HostListItem]) -> Table {
        let mut table = Table::new();
        table.load_preset(comfy_table::presets::NOTHING);
        table.set_header(self.render(Field::header).split('\t').map(str::to_string));
        for item in items {
            table.add_row(self.render(|field| field.value(item)).split('\t').map(str::to_string));
        }
        table
    }
}

fn render_table(items: &[HostListItem]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["NAME", "ACTIVE", "DRIVER", "STATE", "URL", "ERRORS"]);

    for item in items {
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(item.active_marker()),
            Cell::new(&item.driver_name),
            Cell::new(item.state.as_str()).fg(state_color(item.state)),
            Cell::new(&item.url),
            Cell::new(&item.error),
        ]);
    }
    table
}
