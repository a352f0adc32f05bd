//! 새 방에 처음 깔리는 기본 셋리스트

use crate::protocol::{Setlist, Song};

fn song(id: &str, title: &str, key: &str, tempo: &str, notes: Option<&str>, chart: &str) -> Song {
    Song {
        id: id.to_string(),
        title: title.to_string(),
        key: key.to_string(),
        tempo: tempo.to_string(),
        notes: notes.map(str::to_string),
        chart: chart.to_string(),
    }
}

pub fn default_setlist() -> Setlist {
    Setlist {
        id: "traditional-warmup".to_string(),
        name: "Traditional Warm-Up".to_string(),
        songs: vec![
            song(
                "house-of-the-rising-sun",
                "House of the Rising Sun",
                "Am",
                "Slow 6/8",
                Some("Arpeggiate the verses, full strums on the turnaround."),
                "[Am] [C] [D] [F]  [Am] [C] [E] [E]

There [Am]is a [C]house in [D]New Or[F]leans
They [Am]call the [C]Rising [E]Sun
And it's [Am]been the [C]ruin of [D]many a poor [F]boy
And [Am]God, I [E]know I'm [Am]one

TURNAROUND:
[Am] [C] [D] [F] [Am] [E] [Am] [E]",
            ),
            song(
                "will-the-circle-be-unbroken",
                "Will the Circle Be Unbroken",
                "G",
                "Medium",
                Some("Everyone on the chorus. Trade breaks after verse two."),
                "[G]  [C]  [G]  [D]

I was [G]standing by my window
On a [C]cold and cloudy [G]day
When I saw that hearse come rolling
For to [D]carry my mother a[G]way

CHORUS:
Will the [G]circle be unbroken
By and [C]by, Lord, by and [G]by
There's a better home a-waiting
In the [D]sky, Lord, in the [G]sky",
            ),
            song(
                "wayfaring-stranger",
                "Wayfaring Stranger",
                "Em",
                "Slow",
                None,
                "[Em]  [Am]  [Em]  [B7]

I am a [Em]poor wayfaring stranger
[Am]Traveling [Em]through this world below
There is no sickness, toil nor danger
In [Am]that bright [B7]land to which I [Em]go

BRIDGE:
I'm [C]going there to [G]see my father
I'm [C]going there no [B7]more to roam",
            ),
            song(
                "amazing-grace",
                "Amazing Grace",
                "D",
                "Slow 3/4",
                Some("Closer. Let the last chorus breathe."),
                "[D]  [G]  [D]  [A]

A[D]mazing [D7]grace, how [G]sweet the [D]sound
That saved a wretch like [A]me
I [D]once was [D7]lost, but [G]now am [D]found
Was blind, but [A]now I [D]see",
            ),
        ],
    }
}
