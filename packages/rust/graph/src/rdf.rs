//! Triple persistence as RDF, serialized to Turtle.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use oxigraph::io::{RdfFormat, RdfSerializer};
use oxigraph::model::{GraphName, GraphNameRef, Literal, NamedNode, Quad, Subject, Term};
use oxigraph::store::Store;
use tracing::{debug, info};

use clearsure_shared::{ClearSureError, Result};

use crate::triples::Triple;

pub const NAMESPACE: &str = "http://example.org/clearsure/";
pub const PREFIX: &str = "ex";

fn rdf_err(e: impl std::fmt::Display) -> ClearSureError {
    ClearSureError::Rdf(e.to_string())
}

/// In-memory RDF graph. Subjects and predicates live under [`NAMESPACE`],
/// objects are plain literals.
pub struct TripleStore {
    store: Store,
}

impl TripleStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            store: Store::new().map_err(rdf_err)?,
        })
    }

    fn iri(local: &str) -> Result<NamedNode> {
        NamedNode::new(format!("{NAMESPACE}{local}")).map_err(rdf_err)
    }

    /// Returns `false` if the triple was already present.
    pub fn add_triple(&self, subject: &str, predicate: &str, object: &str) -> Result<bool> {
        let quad = Quad::new(
            Self::iri(subject)?,
            Self::iri(predicate)?,
            Literal::new_simple_literal(object),
            GraphName::DefaultGraph,
        );
        self.store.insert(&quad).map_err(rdf_err)
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len().map_err(rdf_err)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty().map_err(rdf_err)
    }

    /// All triples, with the namespace stripped from subject and predicate.
    pub fn triples(&self) -> Result<Vec<Triple>> {
        let mut triples = Vec::new();
        for quad in self.store.iter() {
            let quad = quad.map_err(rdf_err)?;
            let subject = match &quad.subject {
                Subject::NamedNode(node) => local_name(node.as_str()),
                other => other.to_string(),
            };
            let object = match &quad.object {
                Term::Literal(literal) => literal.value().to_string(),
                Term::NamedNode(node) => local_name(node.as_str()),
                other => other.to_string(),
            };
            triples.push((subject, local_name(quad.predicate.as_str()), object));
        }
        triples.sort();
        Ok(triples)
    }

    /// Serialize the default graph to `path` as Turtle.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| ClearSureError::io(path, e))?;
        let serializer = RdfSerializer::from_format(RdfFormat::Turtle)
            .with_prefix(PREFIX, NAMESPACE)
            .map_err(rdf_err)?;
        self.store
            .dump_graph_to_writer(GraphNameRef::DefaultGraph, serializer, BufWriter::new(file))
            .map_err(rdf_err)?;
        info!(path = %path.display(), "Saved RDF graph");
        Ok(())
    }

    /// Add the triples of the Turtle file at `path`. A missing file leaves
    /// the store unchanged.
    pub fn load(&self, path: &Path) -> Result<()> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No RDF graph to load");
                return Ok(());
            }
            Err(e) => return Err(ClearSureError::io(path, e)),
        };
        self.store
            .load_from_reader(RdfFormat::Turtle, BufReader::new(file))
            .map_err(rdf_err)
    }
}

fn local_name(iri: &str) -> String {
    iri.strip_prefix(NAMESPACE).unwrap_or(iri).to_string()
}
