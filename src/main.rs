//! Semcan demo: starts an in-process event cloud, registers a subscription,
//! publishes a stream of events and prints the notifications it receives.
//!
//! Usage:
//!   cargo run -- --grid 1,2,2,2 --events 10
//!   cargo run -- --config overlay.json --notify-url http://localhost:9000/notify

use clap::Parser;
use semcan::api::EventCloud;
use semcan::config::OverlayConfig;
use semcan::core::{Node, Quadruple};
use semcan::peer::QueryResult;
use semcan::pubsub::{ChannelSink, HttpSubscriberSink, NotificationKind, SubscriberSink};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const FOAF: &str = "http://xmlns.com/foaf/0.1/";

const SUBSCRIPTION: &str = "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
SELECT ?name ?email WHERE { GRAPH ?g { ?id foaf:name ?name . ?id foaf:email ?email } }";

#[derive(Parser, Debug)]
#[command(name = "semcan")]
#[command(about = "Distributed RDF event notification over a semantic CAN", long_about = None)]
struct Args {
    /// JSON overlay configuration; overrides --grid
    #[arg(short, long)]
    config: Option<String>,

    /// Zone slices along graph, subject, predicate and object
    #[arg(short, long, default_value = "1,2,2,2", value_delimiter = ',')]
    grid: Vec<usize>,

    /// Number of events to publish
    #[arg(short, long, default_value = "10")]
    events: usize,

    /// Push notifications to this HTTP endpoint instead of printing them
    #[arg(long)]
    notify_url: Option<String>,

    /// Deliver the matched quadruples instead of the projected binding
    #[arg(long)]
    compound: bool,
}

fn overlay_config(args: &Args) -> semcan::Result<OverlayConfig> {
    if let Some(path) = &args.config {
        return OverlayConfig::from_json_file(path);
    }
    let peers_per_dimension: [usize; 4] = args.grid.as_slice().try_into().map_err(|_| {
        semcan::Error::Config(format!("--grid needs 4 values, got {}", args.grid.len()))
    })?;
    let config = OverlayConfig { peers_per_dimension, ..Default::default() };
    config.validate()?;
    Ok(config)
}

fn person(i: usize) -> Vec<Quadruple> {
    let graph = Node::iri(format!("http://example.org/event/{}", i));
    let id = Node::iri(format!("http://example.org/person/{}", i));
    vec![
        Quadruple::new(
            graph.clone(),
            id.clone(),
            Node::iri(format!("{}name", FOAF)),
            Node::literal(format!("Person {}", i)),
        ),
        Quadruple::new(
            graph,
            id,
            Node::iri(format!("{}email", FOAF)),
            Node::literal(format!("person{}@example.org", i)),
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = overlay_config(&args)?;
    let cloud = EventCloud::start(config)?;
    println!("Started {} peers, diameter {}", cloud.peers().len(), cloud.diameter());

    let kind = if args.compound {
        NotificationKind::CompoundEvent
    } else {
        NotificationKind::Binding
    };
    let (sink, mut receiver) = match &args.notify_url {
        Some(url) => {
            let sink = HttpSubscriberSink::new(url.clone())?;
            (Arc::new(sink) as Arc<dyn SubscriberSink>, None)
        }
        None => {
            let (sink, receiver) = ChannelSink::new();
            (Arc::new(sink) as Arc<dyn SubscriberSink>, Some(receiver))
        }
    };
    let subscription = cloud.random_peer().subscribe(SUBSCRIPTION, kind, sink).await?;
    println!("Subscription {}", subscription);

    for i in 0..args.events {
        cloud.random_peer().publish_batch(person(i)).await?;
    }

    if let Some(receiver) = receiver.as_mut() {
        let mut received = 0;
        while received < args.events {
            match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await {
                Ok(Some(notification)) => {
                    received += 1;
                    println!("{} -> {:?}", notification.id, notification.payload);
                }
                Ok(None) | Err(_) => break,
            }
        }
        println!("Received {} of {} notifications", received, args.events);
    }

    let count = cloud.random_peer().count_statements().await?;
    println!("{} quadruples stored", count);

    let response = cloud
        .random_peer()
        .query(
            "SELECT (COUNT(?id) AS ?people) WHERE {
                 GRAPH ?g { ?id <http://xmlns.com/foaf/0.1/name> ?name }
             }",
        )
        .await?;
    if let QueryResult::Solutions(rows) = response.result {
        for row in rows {
            println!("{:?}", row);
        }
    }

    cloud.shutdown().await;
    Ok(())
}
