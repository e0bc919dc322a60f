use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::clock::SystemClock;
use crate::config::{self, Backend, Config};
use crate::controller::{Action, Controller, Dispatch, FeedView};
use crate::data::{FeedStore, StaticAuth};
use crate::loader::FeedLoader;
use crate::model::{ActorId, CommentId, PostId};
use crate::remote;
use crate::storage;
use crate::submit::SubmissionCoordinator;

const WRAP_WIDTH: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Feed,
    Post {
        body: String,
        image_url: Option<String>,
    },
    Comment {
        post_id: PostId,
        body: String,
    },
    Reply {
        post_id: PostId,
        parent_id: CommentId,
        body: String,
    },
}

pub fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Feed);
    };
    match name.as_str() {
        "feed" => Ok(Command::Feed),
        "post" => {
            let mut image_url = None;
            let mut words = Vec::new();
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                if arg == "--image" {
                    image_url = Some(iter.next().context("--image needs a url")?.clone());
                } else {
                    words.push(arg.as_str());
                }
            }
            Ok(Command::Post {
                body: words.join(" "),
                image_url,
            })
        }
        "comment" => match rest {
            [post_id, body @ ..] => Ok(Command::Comment {
                post_id: PostId::new(post_id.clone()),
                body: body.join(" "),
            }),
            _ => bail!("usage: glowfeed comment <post-id> <body>"),
        },
        "reply" => match rest {
            [post_id, parent_id, body @ ..] => Ok(Command::Reply {
                post_id: PostId::new(post_id.clone()),
                parent_id: CommentId::new(parent_id.clone()),
                body: body.join(" "),
            }),
            _ => bail!("usage: glowfeed reply <post-id> <comment-id> <body>"),
        },
        other => bail!("unknown command: {other}"),
    }
}

pub fn run(args: &[String]) -> Result<()> {
    let command = parse_command(args)?;
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let store = open_store(&cfg)?;

    let actor = Some(cfg.session.actor_id.trim())
        .filter(|id| !id.is_empty())
        .map(ActorId::from);
    let auth = Arc::new(StaticAuth::new(actor));
    let coordinator = Arc::new(SubmissionCoordinator::new(
        store.clone(),
        auth.clone(),
        Arc::new(SystemClock),
        cfg.feed.cooldowns(),
    ));
    let mut controller = Controller::new(FeedLoader::new(store), coordinator, auth);
    let wait = cfg.store.timeout * 3 + Duration::from_secs(1);

    match command {
        Command::Feed => {
            controller.reload();
        }
        Command::Post { body, image_url } => {
            let action = Action::Post { image_url };
            controller.set_draft(action.key(), body);
            submit(&mut controller, action)?;
        }
        Command::Comment { post_id, body } => {
            let action = Action::Comment { post_id };
            controller.set_draft(action.key(), body);
            submit(&mut controller, action)?;
        }
        Command::Reply {
            post_id,
            parent_id,
            body,
        } => {
            let action = Action::Reply { post_id, parent_id };
            controller.set_draft(action.key(), body);
            submit(&mut controller, action)?;
        }
    }

    if !controller.wait_idle(wait) {
        bail!("timed out waiting for the feed store");
    }
    if controller.sign_in_required() {
        bail!(sign_in_hint());
    }
    if let Some(message) = controller.error_message() {
        bail!("{message}");
    }
    if let Some(message) = controller.status_message() {
        eprintln!("{message}");
    }
    print!(
        "{}",
        render_feed(controller.view(), &cfg.feed.placeholder_name, WRAP_WIDTH)
    );
    Ok(())
}

fn submit(controller: &mut Controller, action: Action) -> Result<()> {
    match controller.submit(action) {
        Ok(Dispatch::Sent) | Ok(Dispatch::Ignored) => Ok(()),
        Err(crate::error::FeedError::AuthRequired) => bail!(sign_in_hint()),
        Err(err) => bail!(err.user_message()),
    }
}

fn sign_in_hint() -> String {
    "Sign in to continue: set session.actor_id in the config file or GLOWFEED_SESSION__ACTOR_ID."
        .to_string()
}

fn open_store(cfg: &Config) -> Result<Arc<dyn FeedStore>> {
    match cfg.store.backend {
        Backend::Local => {
            let store = storage::Store::open(storage::Options {
                path: cfg.store.path.clone(),
                busy_timeout: cfg.store.timeout,
            })
            .context("open local feed store")?;
            Ok(Arc::new(store))
        }
        Backend::Remote => {
            let client = remote::Client::new(remote::ClientConfig {
                base_url: cfg.store.url.clone(),
                api_key: cfg.store.api_key.clone(),
                access_token: cfg.session.access_token.clone(),
                timeout: cfg.store.timeout,
                ..remote::ClientConfig::default()
            })
            .context("create remote feed store client")?;
            Ok(Arc::new(client))
        }
    }
}

/// Plain-text rendering of the feed, newest post first.
pub fn render_feed(view: &FeedView, placeholder: &str, width: usize) -> String {
    let mut out = String::new();
    if view.posts.is_empty() {
        out.push_str("No posts yet.\n");
        return out;
    }
    for post in &view.posts {
        out.push_str(&format!(
            "[{}] {} · {}\n",
            post.id,
            post.author_label(placeholder),
            post.created_at.format("%Y-%m-%d %H:%M")
        ));
        push_wrapped(&mut out, &post.body, "  ", width);
        if let Some(url) = &post.image_url {
            out.push_str(&format!("  image: {url}\n"));
        }
        for node in view.threads.get(&post.id).into_iter().flatten() {
            out.push_str(&format!("    [{}] {}\n", node.comment.id, node.comment.author_id));
            push_wrapped(&mut out, &node.comment.body, "      ", width);
            for reply in &node.replies {
                out.push_str(&format!("        ↳ [{}] {}\n", reply.id, reply.author_id));
                push_wrapped(&mut out, &reply.body, "          ", width);
            }
        }
        out.push('\n');
    }
    out
}

fn push_wrapped(out: &mut String, text: &str, indent: &str, width: usize) {
    let options = textwrap::Options::new(width)
        .initial_indent(indent)
        .subsequent_indent(indent);
    for line in textwrap::wrap(text, options) {
        out.push_str(&line);
        out.push('\n');
    }
}
