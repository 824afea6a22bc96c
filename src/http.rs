//! HTTP/WebSocket transport wiring: a static-file `Files` service for the
//! browser UI, the `/ws` upgrade route, and a `/pcap/<name>.pcap` download
//! route with an explicit MIME override — mirroring the teacher's
//! `App::new().service(...)` wiring in `mock/control-api/src/server/mod.rs`.

use std::path::PathBuf;
use std::sync::Arc;

use actix_files::{Files, NamedFile};
use actix_web::{web, App, HttpServer};

use crate::engine::Engine;
use crate::session;

/// Builds and binds the HTTP server, serving until the returned future
/// completes (normally only on process shutdown).
///
/// # Errors
///
/// Returns [`std::io::Error`] if the port cannot be bound.
pub async fn run(
    engine: Arc<Engine>,
    resource_path: PathBuf,
    pcap_output_dir: PathBuf,
    port: u16,
) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&engine)))
            .route("/ws", web::get().to(session::create_ws))
            .app_data(web::Data::new(PcapDir(pcap_output_dir.clone())))
            .service(web::resource("/pcap/{name}.pcap").route(web::get().to(serve_pcap)))
            .service(Files::new("/", resource_path.clone()).index_file("index.html"))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

struct PcapDir(PathBuf);

/// Serves a previously written capture with an explicit pcap MIME type,
/// instead of whatever `actix_files` would infer from the `.pcap`
/// extension.
async fn serve_pcap(dir: web::Data<PcapDir>, name: web::Path<String>) -> actix_web::Result<NamedFile> {
    let path = dir.0.join(format!("{}.pcap", name.into_inner()));
    let file = NamedFile::open(path)?;
    Ok(file.set_content_type("application/vnd.tcpdump.pcap".parse().unwrap()))
}
