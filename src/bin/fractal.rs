use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use itertools::Itertools;
use fractal::{fdom::Print,
              registry::split_view_path,
              trace,
              Fractal, FractalConfig, StatePatch, ViewDef};

#[derive(clap::Parser, Debug)]
/// Scan an HTML file for named templates, print the template index,
/// and optionally render views into the document.
struct Args {
    /// The HTML file
    #[clap(required(true))]
    file: PathBuf,

    /// Path to a JSON file with configuration settings
    #[clap(long)]
    config: Option<PathBuf>,

    /// Recognize templates by the marker attribute instead of using
    /// native `<template>` content
    #[clap(long)]
    inline_templates: bool,

    /// Add a top-level view, given as a template name or
    /// "template.path#viewName"; can be repeated. Views not defined
    /// yet are defined with the variables mixin.
    #[clap(long)]
    add: Vec<String>,

    /// Initial state for the added views, as a JSON object
    #[clap(long)]
    state: Option<String>,

    /// Print lifecycle traces to stderr
    #[clap(long)]
    trace: bool,
}

/// Define `view_spec` with the variables mixin unless that's done already.
fn ensure_defined(fx: &mut Fractal, view_spec: &str) -> Result<()> {
    let (path, name) = if view_spec.contains('#') {
        split_view_path(view_spec)?
    } else {
        (view_spec, view_spec)
    };
    if fx.get_view(path, name).is_err() {
        fx.define(ViewDef::new(path).name(name).mixin("variables"))?;
    }
    Ok(())
}

fn print_index(out: &mut impl Write, fx: &Fractal) -> Result<()> {
    let branches = fx.branches();
    for path in branches.paths() {
        for id in branches.index_of(path) {
            let b = branches.get(*id)?;
            if b.path() != path {
                continue
            }
            let views = b.view_classes().keys().join(", ");
            match b.reference_path() {
                Some(target) => writeln!(out, "{path} -> {target}  [{views}]")?,
                None => writeln!(out, "{path}  [{views}]")?,
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.trace {
        trace::enabled_set(true);
    }

    let mut config = match &args.config {
        Some(path) => FractalConfig::from_path(path)?,
        None => FractalConfig::default(),
    };
    if args.inline_templates {
        config.native_templates = false;
    }
    let state = match &args.state {
        Some(s) => StatePatch::from_value(
            serde_json::from_str(s).with_context(|| format!("parsing --state {s:?}"))?)?,
        None => StatePatch::new(),
    };

    let markup = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {:?}", args.file))?;
    let mut fx = Fractal::new(config);
    let root = fx.load_markup(&markup)?;
    fx.scan(root)?;

    let root_view = fx.root()?;
    for view_spec in &args.add {
        ensure_defined(&mut fx, view_spec)?;
        fx.append(root_view, view_spec, state.clone())?;
    }

    let mut out = std::io::stdout().lock();
    print_index(&mut out, &fx)?;
    if ! args.add.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", root.to_html_fragment_string(fx.dom())?)?;
    }
    out.flush()?;
    Ok(())
}
