use std::collections::VecDeque;
use tracing::{debug, info};

use crate::sources::Song;

/// Cola FIFO de una guild. La canción actual no vive aquí.
#[derive(Debug, Default)]
pub struct SongQueue {
    items: VecDeque<Song>,
}

impl SongQueue {
    /// Agrega un lote respetando el orden
    pub fn enqueue_all(&mut self, songs: impl IntoIterator<Item = Song>) -> usize {
        let before = self.items.len();
        self.items.extend(songs);
        let added = self.items.len() - before;
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Siguiente canción (estricto FIFO)
    pub fn dequeue(&mut self) -> Option<Song> {
        let next = self.items.pop_front();
        match &next {
            Some(song) => info!("➡️ Siguiente en cola: {}", song.title()),
            None => debug!("📭 Cola vacía, no hay siguiente canción"),
        }
        next
    }

    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Cola limpiada");
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copia de la cola para mostrarla
    pub fn snapshot(&self) -> Vec<Song> {
        self.items.iter().cloned().collect()
    }
}
